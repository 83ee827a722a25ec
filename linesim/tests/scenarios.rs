use float_cmp::approx_eq;
use procsim::{BufferOptions, OversizePolicy};
use quickcheck_macros::quickcheck;
use rstest::{fixture, rstest};

use linesim::{
    run_simulation, ArrivalSpec, BreakdownPolicy, ConfigError, Error, LineBuilder, LineConfig,
    MachineEvent, MachineId, MachineState, MemoryRecorder, RepairModel, SharedRecorder,
    StageSpec,
};
use testing::{history_is_chronological, levels_within_capacity};

/// One deterministic machine fed with one unit every hour.
fn unit_line(stage: StageSpec) -> LineConfig {
    let mut config = LineConfig::new(vec![stage]);
    config.seed = Some(17);
    config.arrivals = ArrivalSpec {
        interval: 1.0,
        size: 1.0,
        ..ArrivalSpec::default()
    };
    config
}

fn unit_stage() -> StageSpec {
    StageSpec {
        name: String::from("unit"),
        cycle_time: 1.0,
        cycle_time_sigma: Some(0.0),
        batch_size: 1.0,
        ..StageSpec::default()
    }
}

/// Two stages with noisy cycles, yields, failures, and breakdowns.
fn noisy_config() -> LineConfig {
    let mut config = LineConfig::new(vec![
        StageSpec {
            name: String::from("cutting"),
            machines: 2,
            cycle_time: 1.5,
            yield_rate: 0.9,
            yield_sigma: 1.0,
            batch_failure_rate: 0.05,
            mtbf_days: Some(2.0),
            mttr_days: 0.25,
            repair_sigma: 1.0,
            batch_size: 10.0,
            output_buffer: BufferOptions::bounded(50.0).name("cut"),
            ..StageSpec::default()
        },
        StageSpec {
            name: String::from("packing"),
            machines: 1,
            cycle_time: 0.5,
            mtbf_days: Some(3.0),
            mttr_days: 0.1,
            batch_size: 5.0,
            ..StageSpec::default()
        },
    ]);
    config.seed = Some(2021);
    config.arrivals = ArrivalSpec {
        interval: 1.0,
        interval_sigma: 0.2,
        size: 12.0,
        size_sigma: 2.0,
    };
    config
}

#[fixture]
fn noisy_line() -> LineConfig {
    noisy_config()
}

#[test]
fn test_unit_line_finishes_one_per_hour() {
    let report = run_simulation(&unit_line(unit_stage()), 10.0, &[1]).unwrap();
    assert!(report.finished() >= 9.0 && report.finished() <= 10.0);
    assert_eq!(report.arrivals.deliveries, 10);
    assert_eq!(report.horizon, 10.0);
}

#[test]
fn test_parked_output_never_completes() {
    let stage = StageSpec {
        output_buffer: BufferOptions::bounded(0.0).oversize(OversizePolicy::Park),
        ..unit_stage()
    };
    let mut line = LineBuilder::new(unit_line(stage)).build().unwrap();
    line.run(10.0).unwrap();
    let report = line.report();
    assert_eq!(report.finished(), 0.0);
    let sink = line.buffer(line.buffers()[1]).unwrap();
    assert_eq!(sink.history().len(), 1);
    assert_eq!(sink.waiting_putters(), 1);
    let machine = &line.machines()[0];
    assert_eq!(machine.state(), MachineState::Unloading);
    assert_eq!(machine.stats().in_flight, 1.0);
    assert!(approx_eq!(f64, report.conservation_gap(), 0.0, epsilon = 1e-9));
}

#[test]
fn test_failing_batches_never_reach_output() {
    let stage = StageSpec {
        batch_failure_rate: 1.0,
        ..unit_stage()
    };
    let mut line = LineBuilder::new(unit_line(stage)).build().unwrap();
    line.run(10.0).unwrap();
    let report = line.report();
    assert_eq!(report.finished(), 0.0);

    let machine = &report.machines[0];
    let failures: Vec<_> = machine
        .events
        .iter()
        .filter(|e| matches!(e.event, MachineEvent::BatchFailed { .. }))
        .map(|e| e.time)
        .collect();
    assert_eq!(
        failures,
        vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]
    );
    assert_eq!(machine.stats.batches_failed, 9);
    assert_eq!(machine.stats.batches_started, 10);
    assert_eq!(machine.stats.scrapped, 9.0);

    let sink = &report.buffers[1];
    assert!(sink
        .history
        .windows(2)
        .all(|pair| pair[1].level <= pair[0].level));
    assert_eq!(sink.level, 0.0);
}

#[test]
fn test_forced_breakdown_discards_batch_in_progress() {
    let stage = StageSpec {
        mttr_days: 0.125,
        repair_sigma: 0.0,
        ..unit_stage()
    };
    let mut line = LineBuilder::new(unit_line(stage)).build().unwrap();
    let machine = MachineId::from(0);
    line.run(2.5).unwrap();
    assert_eq!(
        line.machine(machine).unwrap().state(),
        MachineState::Processing
    );
    assert!(line.break_down(machine).unwrap());

    line.run(4.0).unwrap();
    let stats = line.machine(machine).unwrap().stats();
    assert_eq!(line.machine(machine).unwrap().state(), MachineState::Broken);
    assert_eq!(stats.discarded, 1.0);
    assert_eq!(stats.breakdowns, 1);
    assert_eq!(stats.in_flight, 0.0);

    line.run(4.5).unwrap();
    assert_eq!(
        line.machine(machine).unwrap().state(),
        MachineState::Processing
    );
    let events: Vec<_> = line
        .machine(machine)
        .unwrap()
        .events()
        .into_iter()
        .filter(|e| e.time >= 2.0)
        .map(|e| (e.time, e.event))
        .collect();
    assert_eq!(
        events,
        vec![
            (2.0, MachineEvent::Finished { quantity: 1.0 }),
            (2.0, MachineEvent::Started),
            (2.5, MachineEvent::BrokeDown { discarded: 1.0 }),
            (4.5, MachineEvent::Repaired),
            (4.5, MachineEvent::Started),
        ]
    );
}

#[test]
fn test_run_stops_at_horizon_after_breakdown() {
    let stage = StageSpec {
        cycle_time: 3.0,
        ..unit_stage()
    };
    let mut config = unit_line(stage);
    config.arrivals.interval = 5.0;
    let mut line = LineBuilder::new(config).trace(true).build().unwrap();
    let machine = MachineId::from(0);
    line.run(6.0).unwrap();
    assert_eq!(
        line.machine(machine).unwrap().state(),
        MachineState::Processing
    );
    assert!(line.break_down(machine).unwrap());

    // The completion scheduled at 8 is cancelled, the next delivery is due at 10.
    assert_eq!(line.run(8.5).unwrap(), 8.5);
    assert!(line
        .simulation()
        .trace()
        .iter()
        .all(|entry| entry.time <= 8.5));
    assert_eq!(line.run(9.0).unwrap(), 9.0);
    assert_eq!(line.arrivals().deliveries, 1);
    assert_eq!(line.run(10.0).unwrap(), 10.0);
    assert_eq!(line.arrivals().deliveries, 2);
}

#[rstest(
    policy,
    broken,
    case(BreakdownPolicy::Timer, true),
    case(BreakdownPolicy::OperatingHours, false)
)]
fn test_starved_machine_breakdowns(policy: BreakdownPolicy, broken: bool) {
    let stage = StageSpec {
        mtbf_days: Some(0.1),
        ..unit_stage()
    };
    let mut config = unit_line(stage);
    config.arrivals.interval = 1000.0;
    config.breakdown_policy = policy;
    let report = run_simulation(&config, 500.0, &[1]).unwrap();
    let stats = &report.machines[0].stats;
    assert_eq!(stats.batches_finished, 0);
    assert_eq!(stats.operating_hours, 0.0);
    assert_eq!(stats.breakdowns > 0, broken);
}

#[test]
fn test_breaking_down_unknown_machine() {
    let mut line = LineBuilder::new(unit_line(unit_stage())).build().unwrap();
    assert_eq!(
        line.break_down(MachineId::from(5)),
        Err(Error::UnknownMachine(MachineId::from(5)))
    );
}

#[rstest(
    counts,
    expected,
    case(vec![1, 1], ConfigError::MachineCountMismatch { expected: 1, actual: 2 }),
    case(vec![0], ConfigError::NoMachines(String::from("unit")))
)]
fn test_invalid_machine_counts(counts: Vec<usize>, expected: ConfigError) {
    let result = LineBuilder::new(unit_line(unit_stage()))
        .machine_counts(&counts)
        .build();
    assert_eq!(result.err(), Some(Error::Config(expected)));
}

#[rstest]
fn test_material_is_conserved(noisy_line: LineConfig) {
    let mut line = LineBuilder::new(noisy_line).build().unwrap();
    line.run(200.0).unwrap();
    let report = line.report();
    assert!(report.arrivals.arrived > 0.0);
    assert!(report.finished() > 0.0);
    assert!(approx_eq!(f64, report.conservation_gap(), 0.0, epsilon = 1e-6));
    for &id in line.buffers() {
        let buffer = line.buffer(id).unwrap();
        assert!(levels_within_capacity(buffer));
        assert!(history_is_chronological(buffer));
    }
}

#[rstest]
fn test_finished_quantity_never_decreases(noisy_line: LineConfig) {
    let mut line = LineBuilder::new(noisy_line).build().unwrap();
    let mut finished = 0.0;
    for hour in 1..=100 {
        line.run(f64::from(hour)).unwrap();
        let current = line.finished(1);
        assert!(current >= finished);
        finished = current;
    }
}

#[rstest(
    policy,
    model,
    case(BreakdownPolicy::Timer, RepairModel::LogNormal),
    case(BreakdownPolicy::OperatingHours, RepairModel::LogNormal),
    case(BreakdownPolicy::Timer, RepairModel::LogOfLogNormal),
    case(BreakdownPolicy::OperatingHours, RepairModel::RawLogNormal)
)]
fn test_every_breakdown_is_repaired_before_next_start(
    mut noisy_line: LineConfig,
    policy: BreakdownPolicy,
    model: RepairModel,
) {
    noisy_line.breakdown_policy = policy;
    noisy_line.repair_model = model;
    let report = run_simulation(&noisy_line, 300.0, &[2, 1]).unwrap();
    assert!(report.stages.iter().map(|s| s.breakdowns).sum::<usize>() > 0);
    for machine in &report.machines {
        let mut broken = false;
        for event in &machine.events {
            match event.event {
                MachineEvent::BrokeDown { .. } => {
                    assert!(!broken);
                    broken = true;
                }
                MachineEvent::Repaired => {
                    assert!(broken);
                    broken = false;
                }
                MachineEvent::Started => assert!(!broken),
                _ => {}
            }
        }
        assert_eq!(broken, machine.state == MachineState::Broken);
        assert!(machine.stats.breakdowns >= machine.stats.repairs);
        assert!(machine.stats.breakdowns - machine.stats.repairs <= 1);
    }
}

#[rstest]
fn test_same_seed_same_run(noisy_line: LineConfig) {
    let run = || {
        let mut line = LineBuilder::new(noisy_line.clone())
            .trace(true)
            .build()
            .unwrap();
        line.run(150.0).unwrap();
        (line.simulation().trace().to_vec(), line.report())
    };
    let (first_trace, first_report) = run();
    let (second_trace, second_report) = run();
    assert!(!first_trace.is_empty());
    assert_eq!(first_trace, second_trace);
    assert_eq!(first_report, second_report);
}

#[rstest]
fn test_recorder_sees_every_change(noisy_line: LineConfig) {
    let recorder = MemoryRecorder::shared();
    let shared: SharedRecorder = recorder.clone();
    let mut line = LineBuilder::new(noisy_line)
        .recorder(shared)
        .build()
        .unwrap();
    line.run(50.0).unwrap();
    let report = line.report();
    let recorder = recorder.borrow();

    let samples: usize = report.buffers.iter().map(|b| b.history.len() - 1).sum();
    assert_eq!(recorder.levels.len(), samples);

    for machine in &report.machines {
        let transitions: Vec<_> = recorder.transitions_of(machine.id).collect();
        assert_eq!(transitions[0].from, MachineState::Idle);
        assert_eq!(transitions[0].to, MachineState::Acquiring);
        assert!(transitions.windows(2).all(|pair| pair[0].to == pair[1].from));
        assert_eq!(
            transitions.last().map(|t| t.to),
            Some(machine.state)
        );
    }
}

#[quickcheck]
fn conservation_holds_for_any_seed(seed: u64) -> bool {
    let mut config = noisy_config();
    config.seed = Some(seed);
    let report = run_simulation(&config, 100.0, &[2, 1]).unwrap();
    approx_eq!(f64, report.conservation_gap(), 0.0, epsilon = 1e-6)
        && report
            .buffers
            .iter()
            .all(|b| b.history.iter().all(|s| s.level >= -1e-9))
}
