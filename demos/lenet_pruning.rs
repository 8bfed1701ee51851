//! LeNet-5 Structured Pruning Example
//!
//! Demonstrates a full pruning round on LeNet-5:
//! - Tracing a network through the `Traceable` seam
//! - JSON sparsity rules with an exclusion
//! - Dependency-aware mask resolution and graph shrinking
//! - Iterative pruning rounds
//!
//! # References
//! - LeCun et al. (1998) - Gradient-based learning applied to document recognition
//! - Li et al. (2017) - Pruning Filters for Efficient ConvNets
//!
//! Run with: cargo run --example lenet_pruning
//! (set `RUST_LOG=podar=debug` for stage logs)

use podar::graph::{Conv2d, LayerId, Linear, Pool2d};
use podar::prelude::*;

struct LeNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

impl LeNet {
    fn new() -> Self {
        let conv = |out: usize, input: usize, seed: u64| {
            let weight = Tensor::kaiming_uniform(&[out, input, 5, 5], input * 25, Some(seed));
            Conv2d::new(weight, Some(Tensor::zeros(&[out])))
        };
        let linear = |out: usize, input: usize, seed: u64| {
            let weight = Tensor::kaiming_uniform(&[out, input], input, Some(seed));
            Linear::new(weight, Some(Tensor::zeros(&[out])))
        };
        Self {
            conv1: conv(6, 1, 1).with_padding(2),
            conv2: conv(16, 6, 2),
            fc1: linear(120, 400, 3),
            fc2: linear(84, 120, 4),
            fc3: linear(10, 84, 5),
        }
    }
}

impl Traceable for LeNet {
    fn trace(&self, b: &mut GraphBuilder, x: LayerId) -> Result<LayerId> {
        let x = b.conv2d("conv1", x, self.conv1.clone())?;
        let x = b.relu("relu1", x)?;
        let x = b.pool2d("pool1", x, Pool2d::max(2, 2))?;
        let x = b.conv2d("conv2", x, self.conv2.clone())?;
        let x = b.relu("relu2", x)?;
        let x = b.pool2d("pool2", x, Pool2d::max(2, 2))?;
        let x = b.flatten("flatten", x)?;
        let x = b.linear("fc1", x, self.fc1.clone())?;
        let x = b.relu("relu3", x)?;
        let x = b.linear("fc2", x, self.fc2.clone())?;
        let x = b.relu("relu4", x)?;
        b.linear("fc3", x, self.fc3.clone())
    }
}

const RULES: &str = r#"{
    "rules": [
        { "sparsity_per_layer": 0.5, "op_types": ["Conv2d"] },
        { "sparsity_per_layer": 0.25, "op_types": ["Linear"] },
        { "exclude": true, "op_names": ["fc3"] }
    ],
    "importance": "l1_norm"
}"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Structured Pruning of LeNet-5 with Podar             ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // =========================================================================
    // 1. Trace the network
    // =========================================================================
    let graph = Graph::trace(&LeNet::new(), &[1, 28, 28])?;
    println!("📊 Traced {} layers", graph.len());
    for layer in graph.layers() {
        println!("   {:<8} {:<12} {:?}", layer.name(), layer.op_type().as_str(), layer.output_shape());
    }
    println!("   Parameters: {}", graph.num_parameters());
    println!("   MACs:       {}\n", graph.flops());

    // =========================================================================
    // 2. One pruning round
    // =========================================================================
    let pipeline = PruningPipeline::new(PipelineConfig::from_json(RULES)?)?;
    let outcome = pipeline.run_round(&graph)?;
    println!("✂️  Round 1");
    print!("{}", outcome.report);
    println!(
        "   Sparsity: {:.1}%  MAC reduction: {:.1}%",
        outcome.report.achieved_sparsity() * 100.0,
        outcome.report.flops_reduction() * 100.0
    );
    for warning in &outcome.warnings {
        println!("   ⚠️  {warning}");
    }
    println!();

    // =========================================================================
    // 3. Carry optimizer state across the rewrite
    // =========================================================================
    let moment = Tensor::ones(&[120, 400]);
    let moved = outcome.remap.transplant("fc1", &moment)?;
    println!("🔁 fc1 optimizer moment {:?} -> {:?}\n", moment.shape(), moved.shape());

    // =========================================================================
    // 4. Iterative rounds
    // =========================================================================
    println!("🔄 Two iterative rounds");
    for (i, round) in pipeline.run_iterative(&graph, 2)?.iter().enumerate() {
        println!(
            "   round {}: params {:>6}  conv2 width {}",
            i + 1,
            round.report.params_after,
            round.graph.get("conv2").map_or(0, |l| l.out_channels())
        );
    }

    Ok(())
}
