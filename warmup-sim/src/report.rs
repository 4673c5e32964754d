//! Human-readable simulation report.

use framelock_node::{NodeReport, SimulationReport, SimulationSettings};

/// Print the outcome of a simulation.
pub fn print(settings: &SimulationSettings, outcome: &SimulationReport) {
    println!("=== framelock-sim ===");
    println!();
    println!("Cluster:");
    println!("  Repeaters: {}", settings.repeaters);
    println!("  Slack:     {}", settings.slack);
    println!(
        "  Network:   {} sent, {} dropped",
        outcome.messages_sent, outcome.messages_dropped
    );
    println!("  Elapsed:   {} ms", outcome.elapsed_ms);
    println!();

    println!("Nodes:");
    for node in &outcome.nodes {
        println!("  [{}] {:?}: {}", node.node_id, node.role, describe(node));
    }
    println!();

    if outcome.succeeded() {
        println!("Barrier warmed up on every node");
    } else {
        println!("Barrier warmup FAILED");
    }
}

fn describe(node: &NodeReport) -> String {
    let mut text = if node.warmed_up {
        "warmed up".to_string()
    } else {
        node.initialization_state.description().to_string()
    };

    if let Some(depth) = node.present_pipeline_depth {
        text.push_str(&format!(", pipeline depth {}", depth));
    }
    if let Some(additional) = node.additional_presents {
        text.push_str(&format!(", {} additional presents", additional));
    }
    if node.acknowledged == Some(true) {
        text.push_str(", acknowledged");
    }
    if node.unsynchronized_presents > 0 {
        text.push_str(&format!(
            ", {} unsynchronized presents",
            node.unsynchronized_presents
        ));
    }
    if let Some(error) = &node.error {
        text.push_str(&format!(" ({})", error));
    }
    text.push_str(&format!(", {} frames", node.frames));
    text
}
