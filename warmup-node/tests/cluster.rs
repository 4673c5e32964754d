//! Whole-cluster warmup over the loopback network and a simulated barrier.

use framelock_node::simulation::{run_simulation, SimulationReport, SimulationSettings};
use framelock_node::{NodeRole, WarmupConfig};
use framelock_types::InitializationState;

fn settings(repeaters: u8, slack: u64) -> SimulationSettings {
    SimulationSettings {
        repeaters,
        slack,
        warmup: WarmupConfig {
            handshake_timeout_ms: 20_000,
            repeat_message_interval_ms: 20,
            ..WarmupConfig::default()
        },
        ..SimulationSettings::default()
    }
}

fn run(settings: &SimulationSettings) -> SimulationReport {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("framelock_node=debug")
        .with_test_writer()
        .try_init();
    run_simulation(settings).unwrap()
}

fn assert_burst(report: &SimulationReport, depth: u32, additional: u32) {
    assert!(report.succeeded(), "cluster failed: {:#?}", report);
    let emitter = report.emitter().unwrap();
    assert_eq!(emitter.present_pipeline_depth, Some(depth));
    for repeater in report.repeaters() {
        assert_eq!(
            repeater.additional_presents,
            Some(additional),
            "repeater {}",
            repeater.node_id
        );
        assert_eq!(repeater.initialization_state, InitializationState::Initialized);
    }
}

// ===== Successful warmups =====

#[test]
fn no_latency_barrier_needs_one_additional_present() {
    let report = run(&settings(2, 0));
    assert_burst(&report, 2, 1);
}

#[test]
fn pre_present_wait_barrier_needs_two_additional_presents() {
    let report = run(&settings(2, 1));
    assert_burst(&report, 4, 2);
}

#[test]
fn single_repeater_with_late_barrier() {
    let report = run(&SimulationSettings {
        activation_delay_ms: 300,
        ..settings(1, 0)
    });
    assert_burst(&report, 2, 1);
}

#[test]
fn lossy_network_still_warms_up() {
    let report = run(&SimulationSettings {
        drop_every: 4,
        ..settings(3, 0)
    });
    assert!(report.messages_dropped > 0);
    assert_burst(&report, 2, 1);
}

#[test]
fn lone_emitter_warms_up_alone() {
    let report = run(&settings(0, 0));
    assert!(report.succeeded());
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.emitter().unwrap().present_pipeline_depth, Some(0));
}

#[test]
fn promoted_backup_presents_once_without_the_barrier() {
    let mut settings = settings(2, 0);
    settings.promote_backup = true;
    settings.warmup.repeaters_delayed = true;

    let report = run(&settings);
    assert!(report.succeeded(), "cluster failed: {:#?}", report);

    for node in &report.nodes {
        let expected = u64::from(node.role == NodeRole::Backup);
        assert_eq!(
            node.unsynchronized_presents, expected,
            "node {} ({:?})",
            node.node_id, node.role
        );
    }
    assert_eq!(
        report
            .nodes
            .iter()
            .filter(|node| node.role == NodeRole::Backup)
            .count(),
        1
    );
}

// ===== Failures =====

#[test]
fn barrier_that_never_blocks_times_out() {
    let mut settings = SimulationSettings {
        activation_delay_ms: 600_000,
        ..settings(2, 0)
    };
    settings.warmup.handshake_timeout_ms = 500;

    let report = run(&settings);
    assert!(!report.succeeded());
    assert_eq!(
        report.emitter().unwrap().initialization_state,
        InitializationState::BarrierWarmupTimeout
    );
    for node in &report.nodes {
        assert!(!node.warmed_up);
        assert!(node.initialization_state.is_failure());
    }
}

#[test]
fn termination_aborts_every_node() {
    let report = run(&SimulationSettings {
        activation_delay_ms: 600_000,
        terminate_after_ms: Some(300),
        ..settings(2, 0)
    });

    assert!(!report.succeeded());
    for node in &report.nodes {
        assert_eq!(
            node.initialization_state,
            InitializationState::UnexpectedTermination,
            "node {}",
            node.node_id
        );
    }
}
