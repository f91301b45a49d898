//! Cross-unit symbol resolution and dead global elimination.

use std::collections::{BTreeSet, VecDeque};

use hashbrown::HashMap;

use crate::{
    diagnostics::LinkError,
    middle::ir::{GlobalEntry, Instruction, TranslationUnit},
};

/// How the set of globals that get code generated is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DceStrategy {
    /// Every referenced name is live, plus one pass of reference pruning
    #[default]
    SinglePass,
    /// Only globals transitively reachable from `main` are live
    Reachability,
}

/// Units that passed linking along with the globals to generate
#[derive(Debug)]
pub struct LinkedProgram {
    pub units: Vec<TranslationUnit>,
    pub live: BTreeSet<String>,
    /// Index of the unit defining each global
    owners: HashMap<String, usize>,
}

impl LinkedProgram {
    pub fn is_live(&self, name: &str) -> bool {
        self.live.contains(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&GlobalEntry> {
        let owner = *self.owners.get(name)?;
        self.units[owner].global(name)
    }

    /// Live globals, unit by unit in declaration order
    pub fn live_globals(&self) -> impl Iterator<Item = (&str, &GlobalEntry)> {
        self.units
            .iter()
            .flat_map(|unit| unit.iter_globals())
            .filter(|(name, _)| self.is_live(name))
    }
}

pub fn link(
    mut units: Vec<TranslationUnit>,
    strategy: DceStrategy,
) -> Result<LinkedProgram, Vec<LinkError>> {
    let mut errors = Vec::new();

    // Every declared name must be unique across units
    let mut owners = HashMap::new();
    let mut duplicates = BTreeSet::new();

    for (index, unit) in units.iter().enumerate() {
        for name in &unit.global_names {
            if owners.insert(name.clone(), index).is_some() {
                duplicates.insert(name.clone());
            }
        }
    }

    errors.extend(duplicates.into_iter().map(LinkError::MultipleDefinitions));

    // Everything referenced anywhere is live and must resolve
    let mut live = BTreeSet::from(["main".to_owned()]);

    for unit in &units {
        live.extend(unit.references.iter().cloned());
    }

    errors.extend(
        live.iter()
            .filter(|name| !owners.contains_key(*name))
            .cloned()
            .map(LinkError::UndefinedSymbol),
    );

    errors.extend(check_assignments(&units, &owners));

    if !errors.is_empty() {
        return Err(errors);
    }

    prune_references(&mut units, &live);

    let live = match strategy {
        DceStrategy::SinglePass => live,
        DceStrategy::Reachability => reachable(&units, &owners),
    };

    let program = LinkedProgram {
        units,
        live,
        owners,
    };

    for unit in &program.units {
        for (name, _) in unit.iter_globals() {
            if !program.is_live(name) {
                tracing::trace!(global = name, unit = %unit.source_name, "pruned dead global");
            }
        }
    }

    tracing::debug!(
        %strategy,
        units = program.units.len(),
        live = program.live.len(),
        "linked program"
    );

    Ok(program)
}

/// Writes to a global are only allowed when it is not callable.
fn check_assignments(units: &[TranslationUnit], owners: &HashMap<String, usize>) -> Vec<LinkError> {
    let targets = units
        .iter()
        .flat_map(|unit| unit.iter_globals())
        .flat_map(|(_, entry)| &entry.body)
        .filter_map(|instruction| match instruction {
            Instruction::AssignGlobal(name) => Some(name),
            _ => None,
        })
        .filter(|name| {
            owners
                .get(*name)
                .and_then(|owner| units[*owner].global(name))
                .is_some_and(|entry| entry.kind.is_callable())
        })
        .cloned()
        .collect::<BTreeSet<_>>();

    targets.into_iter().map(LinkError::AssignToFunction).collect()
}

/// A dead global gives up the references it made, a live one restores them.
fn prune_references(units: &mut [TranslationUnit], live: &BTreeSet<String>) {
    for unit in units {
        let TranslationUnit {
            global_names,
            globals,
            references,
            ..
        } = unit;

        for name in global_names.iter() {
            let Some(entry) = globals.get(name) else {
                continue;
            };

            if live.contains(name) {
                references.extend(
                    entry
                        .references
                        .iter()
                        .filter(|symbol| !live.contains(*symbol))
                        .cloned(),
                );
            } else {
                for symbol in &entry.references {
                    references.remove(symbol);
                }
            }
        }
    }
}

/// Worklist over body mentions starting at `main` and every file scope
/// reference.
fn reachable(units: &[TranslationUnit], owners: &HashMap<String, usize>) -> BTreeSet<String> {
    let mut live = BTreeSet::new();
    let mut worklist = VecDeque::from(["main".to_owned()]);

    for unit in units {
        worklist.extend(unit.root_references.iter().cloned());
    }

    while let Some(name) = worklist.pop_front() {
        if !live.insert(name.clone()) {
            continue;
        }

        let Some(entry) = owners
            .get(&name)
            .and_then(|owner| units[*owner].global(&name))
        else {
            continue;
        };

        worklist.extend(
            entry
                .mentions
                .iter()
                .filter(|mention| !live.contains(*mention))
                .cloned(),
        );
    }

    live
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    fn units(sources: &[&str]) -> Vec<TranslationUnit> {
        sources
            .iter()
            .map(|source| Parser::parse_unit(&SourceFile::from_memory(*source)).unwrap())
            .collect()
    }

    fn live(program: &LinkedProgram) -> Vec<&str> {
        program.live.iter().map(String::as_str).collect()
    }

    #[test]
    fn duplicate_definitions_across_units() {
        let errors = link(
            units(&["f() {} main() {}", "g() {} f() {}", "g() {}"]),
            DceStrategy::SinglePass,
        )
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                LinkError::MultipleDefinitions("f".to_owned()),
                LinkError::MultipleDefinitions("g".to_owned()),
            ]
        );
    }

    #[test]
    fn undefined_symbols_are_reported_sorted() {
        let errors = link(
            units(&["extrn zeta, alpha; main() { zeta(); alpha(); }"]),
            DceStrategy::SinglePass,
        )
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                LinkError::UndefinedSymbol("alpha".to_owned()),
                LinkError::UndefinedSymbol("zeta".to_owned()),
            ]
        );
    }

    #[test]
    fn main_is_required() {
        let errors = link(units(&["f() {}"]), DceStrategy::SinglePass).unwrap_err();

        assert_eq!(errors, vec![LinkError::UndefinedSymbol("main".to_owned())]);
    }

    #[test]
    fn unreferenced_globals_are_dead() {
        let program = link(
            units(&["unused() {} main() { return helper(); }", "helper() {}"]),
            DceStrategy::SinglePass,
        )
        .unwrap();

        assert_eq!(live(&program), vec!["helper", "main"]);
        assert_eq!(
            program
                .live_globals()
                .map(|(name, _)| name)
                .collect::<Vec<_>>(),
            vec!["main", "helper"]
        );
        assert!(program.lookup("unused").is_some());
    }

    #[test]
    fn single_pass_keeps_what_dead_code_references() {
        let source = "helper() {} dead() { helper(); } main() {}";

        let program = link(units(&[source]), DceStrategy::SinglePass).unwrap();
        assert!(program.is_live("helper"));
        assert!(!program.is_live("dead"));
        // The dead global gave up its reference
        assert!(!program.units[0].references.contains("helper"));

        let program = link(units(&[source]), DceStrategy::Reachability).unwrap();
        assert_eq!(live(&program), vec!["main"]);
    }

    #[test]
    fn reachability_follows_forward_mentions_and_roots() {
        let program = link(
            units(&[
                "main() { return a(); } a() { return b; } b = 1; c() {}",
                "extrn d; d() {} e() {}",
            ]),
            DceStrategy::Reachability,
        )
        .unwrap();

        assert_eq!(live(&program), vec!["a", "b", "d", "main"]);
    }

    #[test]
    fn function_scope_extrn_keeps_its_target_reachable() {
        let program = link(
            units(&[indoc::indoc! {r#"
                helper() { return 41; }
                unused() {}
                main() { extrn helper; __asm__ { "cal .helper" } return 0; }
            "#}]),
            DceStrategy::Reachability,
        )
        .unwrap();

        assert_eq!(live(&program), vec!["helper", "main"]);
        assert!(program.lookup("main").unwrap().mentions.contains("helper"));
    }

    #[test]
    fn assigning_to_a_function_from_another_unit() {
        let errors = link(
            units(&["extrn f; main() { f = 1; }", "f() {}"]),
            DceStrategy::SinglePass,
        )
        .unwrap_err();

        assert_eq!(errors, vec![LinkError::AssignToFunction("f".to_owned())]);
    }
}
