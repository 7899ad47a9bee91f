//! Shipped scenario files load, match the built-ins and run.

use std::path::PathBuf;

use combat_headless::batch::{run_batch, BatchConfig};
use combat_headless::content::build_encounter;
use combat_headless::scenario::Scenario;

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(format!("{name}.ron"))
}

#[test]
fn shipped_files_match_builtins() {
    for (name, builtin) in [
        ("fire_mage", Scenario::fire_mage()),
        ("arcane_mage", Scenario::arcane_mage()),
    ] {
        let loaded = Scenario::load(scenario_path(name)).unwrap();
        assert_eq!(loaded.name, name);
        assert_eq!(loaded.spells, builtin.spells, "{name} spells");
        assert_eq!(loaded.buffs, builtin.buffs, "{name} buffs");
        assert_eq!(loaded.rotation, builtin.rotation, "{name} rotation");
    }
}

#[test]
fn shipped_files_build() {
    for name in ["fire_mage", "arcane_mage"] {
        let path = scenario_path(name);
        let scenario = Scenario::resolve(path.to_str().unwrap()).unwrap();
        let encounter = build_encounter(&scenario).unwrap();
        assert_eq!(encounter.targets.len(), 1);
        assert_eq!(encounter.spells.len(), scenario.spells.len());
    }
}

#[test]
fn file_scenario_batch_is_reproducible() {
    let scenario = Scenario::load(scenario_path("arcane_mage")).unwrap();
    let config = BatchConfig::new("arcane_mage", 8)
        .with_duration(45.0)
        .with_seed(77)
        .keeping_iterations();

    let first = run_batch(&scenario, config.clone()).unwrap();
    let second = run_batch(&scenario, config).unwrap();

    assert!(first.errors.is_empty());
    assert_eq!(first.base_seed, 77);
    assert_eq!(first.iterations[3].seed, 80);
    assert_eq!(first.summary, second.summary);
    assert!(first.summary.unit("Mage").unwrap().dps.mean > 0.0);
}
