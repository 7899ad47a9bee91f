//! End-to-end encounter scenarios.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use combat_core::prelude::*;
use combat_core::rng::RngEngine;
use combat_core::time::ms;
use combat_test_utils::determinism::{strategies, verify_determinism, verify_reset_determinism};
use combat_test_utils::fixtures::{self, duel, fire_mage, short_config};
use proptest::prelude::*;

#[test]
fn channel_ticks_every_second_and_frees_caster() {
    let (mut sim, mage, boss) = duel(short_config(10, 0));
    let ticks = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&ticks);

    let mut config = fixtures::arcane_missiles();
    config.dot = Some(
        DotConfig::new(
            AuraConfig::new("Arcane Missiles", Duration::ZERO),
            5,
            Duration::from_secs(1),
        )
        .with_on_tick(move |sim, dot| {
            log.borrow_mut()
                .push((sim.now(), sim.dot(dot)?.tick_count()));
            Ok(())
        }),
    );
    let missiles = sim.register_spell(mage, config).unwrap();

    sim.reset(0).unwrap();
    assert_eq!(sim.try_cast(missiles, boss).unwrap(), CastStatus::Completed);
    sim.run(ms(10_000)).unwrap();

    assert_eq!(
        *ticks.borrow(),
        vec![
            (ms(1_000), 1),
            (ms(2_000), 2),
            (ms(3_000), 3),
            (ms(4_000), 4),
            (ms(5_000), 5)
        ]
    );
    let dot = sim.spell(missiles).unwrap().dot(boss).unwrap();
    assert_eq!(sim.dot(dot).unwrap().tick_count(), 5);
    assert!(!sim.aura(sim.dot(dot).unwrap().aura()).unwrap().is_active());
    assert!(!sim.unit(mage).unwrap().is_channeling());
}

#[test]
fn refreshed_buff_expires_once() {
    let (mut sim, mage, _) = duel(short_config(60, 0));
    let expiries = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&expiries);
    let buff = sim
        .register_aura(
            mage,
            AuraConfig::new("Power Infusion", Duration::from_secs(20)).on_expire(
                move |sim, _| {
                    log.borrow_mut().push(sim.now());
                    Ok(())
                },
            ),
        )
        .unwrap();

    sim.reset(0).unwrap();
    sim.schedule(Duration::ZERO, move |sim| sim.activate_aura(buff))
        .unwrap();
    sim.schedule(ms(10_000), move |sim| sim.activate_aura(buff))
        .unwrap();
    sim.run(ms(60_000)).unwrap();

    assert_eq!(*expiries.borrow(), vec![ms(30_000)]);
}

#[test]
fn stacking_buff_caps_at_three() {
    let (mut sim, mage, _) = duel(short_config(60, 0));
    let totals = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&totals);
    let buff = sim
        .register_aura(
            mage,
            AuraConfig::new("Arcane Blast", Duration::from_secs(8))
                .with_max_stacks(3)
                .with_initial_stacks(0)
                .on_stacks_change(move |_, _, _, new| {
                    log.borrow_mut().push(new);
                    Ok(())
                }),
        )
        .unwrap();

    sim.reset(0).unwrap();
    sim.activate_aura(buff).unwrap();
    for _ in 0..5 {
        sim.add_stack(buff).unwrap();
    }

    assert_eq!(sim.aura(buff).unwrap().stacks(), 3);
    assert_eq!(*totals.borrow(), vec![1, 2, 3]);
}

#[test]
fn cooldown_ready_exactly_at_boundary() {
    let (mut sim, mage, boss) = duel(short_config(60, 0));
    let blast = sim.register_spell(mage, fixtures::fire_blast()).unwrap();
    sim.reset(0).unwrap();
    assert!(sim.try_cast(blast, boss).unwrap().is_success());

    sim.run(ms(7_000)).unwrap();
    sim.schedule(ms(7_999), move |sim| {
        assert_eq!(
            sim.check_cast(blast, boss)?,
            Some(CastFailure::OnCooldown)
        );
        Ok(())
    })
    .unwrap();
    sim.schedule(ms(8_000), move |sim| {
        assert_eq!(sim.check_cast(blast, boss)?, None);
        Ok(())
    })
    .unwrap();
    sim.run(ms(8_000)).unwrap();
}

#[test]
fn shared_timer_gates_both_spells() {
    let (mut sim, mage, boss) = duel(short_config(60, 0));
    let shared = sim.new_timer().unwrap();

    let mut first = fixtures::fire_blast();
    first.default_cast = CastConfig::off_gcd();
    first.cooldown = Some(CooldownConfig {
        duration: Duration::from_secs(30),
        shared_timer: Some(shared),
    });
    let mut second = first.clone();
    second.action_id = ActionId::spell(12_472);

    let first = sim.register_spell(mage, first).unwrap();
    let second = sim.register_spell(mage, second).unwrap();

    sim.reset(0).unwrap();
    assert!(sim.try_cast(first, boss).unwrap().is_success());
    assert_eq!(
        sim.try_cast(second, boss).unwrap(),
        CastStatus::Failed(CastFailure::OnCooldown)
    );
}

#[test]
fn insufficient_mana_is_reported_not_raised() {
    let (mut sim, mage, boss) = duel(short_config(60, 0));
    let mut config = fixtures::fireball();
    config.mana_cost = 10_000.0;
    let fireball = sim.register_spell(mage, config).unwrap();
    sim.reset(0).unwrap();

    let status = sim.try_cast(fireball, boss).unwrap();
    assert!(matches!(
        status,
        CastStatus::Failed(CastFailure::InsufficientResource { .. })
    ));
    assert!(
        (sim.available(mage, ResourceKind::Mana).unwrap() - 8_000.0).abs() < f64::EPSILON
    );
}

#[test]
fn next_cast_consumes_buff_but_not_the_triggering_one() {
    let (mut sim, mage, boss) = duel(short_config(8, 0));
    let mut blast = fixtures::fire_blast();
    blast.outcome = OutcomeKind::AlwaysHit;
    let blast = sim.register_spell(mage, blast).unwrap();
    let fireball = sim.register_spell(mage, fixtures::fireball()).unwrap();

    let consumed = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&consumed);
    let clearcasting = sim
        .register_aura(
            mage,
            AuraConfig::new("Clearcasting", Duration::from_secs(15)).on_cast_complete(
                move |sim, aura, _| {
                    if !sim.gained_this_instant(aura)? && sim.deactivate_aura(aura)? {
                        log.borrow_mut().push(sim.now());
                    }
                    Ok(())
                },
            ),
        )
        .unwrap();
    sim.register_aura(
        mage,
        AuraConfig::never_expires("Clearcasting Trigger")
            .on_reset(|sim, aura| sim.activate_aura(aura))
            .on_spell_hit_dealt(move |sim, _, result| {
                if result.spell == blast {
                    sim.activate_aura(clearcasting)?;
                }
                Ok(())
            }),
    )
    .unwrap();

    sim.set_rotation(mage, move |sim: &mut Simulation, _: UnitId| {
        if !sim.try_cast(blast, boss)?.is_success() {
            sim.try_cast(fireball, boss)?;
        }
        Ok(Decision::Continue)
    })
    .unwrap();
    sim.run_iteration(0).unwrap();

    // Fire Blast at 0 grants the buff; the Fireball cast from 1.5 s consumes it.
    assert_eq!(*consumed.borrow(), vec![ms(5_000)]);
}

#[test]
fn proc_rate_converges() {
    let mut rng = RngEngine::new(12_345);
    let trials = 100_000;
    let successes = (0..trials)
        .filter(|_| rng.proc(0.25, "test", Duration::ZERO))
        .count();
    let rate = successes as f64 / f64::from(trials);
    assert!((rate - 0.25).abs() < 0.01, "observed rate {rate}");
    assert_eq!(rng.procs().stats("test").unwrap().attempts, 100_000);
}

#[test]
fn fire_mage_is_deterministic() {
    verify_determinism(3, 7, || fire_mage(short_config(60, 99))).assert_deterministic();
    let mut sim = fire_mage(short_config(60, 99));
    assert!(verify_reset_determinism(&mut sim, 7));
}

#[test]
fn batch_statistics_are_sane() {
    let mut sim = fire_mage(short_config(60, 5));
    let stats = sim.run_iterations(25).unwrap();
    let mage = stats.unit("Mage").unwrap();

    assert_eq!(stats.iterations, 25);
    assert!(mage.dps.mean > 0.0);
    assert!(mage.dps.stdev > 0.0);
    assert!(mage.action_casts[&fixtures::FIREBALL] > 0.0);
    assert!(mage.action_casts[&fixtures::FIRE_BLAST] > 0.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_seed_replays_identically(config in strategies::arb_config()) {
        let first = fire_mage(config.clone()).run_iteration(0).unwrap();
        let second = fire_mage(config).run_iteration(0).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn mana_never_negative(stats in strategies::arb_caster_stats(), seed in strategies::arb_seed()) {
        let mut sim = Simulation::new(short_config(30, seed));
        let mage = sim.add_unit(UnitConfig::player("Mage", stats)).unwrap();
        let boss = sim.add_unit(UnitConfig::target("Boss", fixtures::boss_stats())).unwrap();
        let fireball = sim.register_spell(mage, fixtures::fireball()).unwrap();
        sim.set_rotation(mage, move |sim: &mut Simulation, _: UnitId| {
            sim.try_cast(fireball, boss)?;
            Ok(Decision::Continue)
        }).unwrap();
        let metrics = sim.run_iteration(0).unwrap();
        prop_assert!(sim.available(mage, ResourceKind::Mana).unwrap() >= 0.0);
        prop_assert!(metrics.unit("Mage").unwrap().total_damage >= 0.0);
    }
}
