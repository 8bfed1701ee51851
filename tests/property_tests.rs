//! Property-based tests using proptest.
//!
//! These tests verify invariants of allocation, resolution and rewriting.

use std::collections::BTreeMap;

use podar::graph::{BatchNorm2d, Conv2d, Linear, Op, Pool2d};
use podar::prelude::*;
use proptest::prelude::*;

fn linear(out: usize, input: usize, seed: u64) -> Linear {
    Linear::new(Tensor::uniform(&[out, input], -1.0, 1.0, Some(seed)), None)
}

// input[4] -> fc1(n) -> relu -> fc2(3) -> output
fn two_linear(n: usize, seed: u64) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[4]).unwrap();
    let h = b.linear("fc1", x, linear(n, 4, seed)).unwrap();
    let r = b.relu("relu", h).unwrap();
    let y = b.linear("fc2", r, linear(3, n, seed + 1)).unwrap();
    b.output("output", y).unwrap();
    b.build().unwrap()
}

// input[3,6,6] -> conv1 -> bn1 -> relu1 -> conv2 -> add(relu1, conv2) -> pool -> flatten -> fc
fn residual(seed: u64) -> Graph {
    let conv = |out, input, s| {
        Conv2d::new(Tensor::uniform(&[out, input, 3, 3], -1.0, 1.0, Some(s)), None).with_padding(1)
    };
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[3, 6, 6]).unwrap();
    let c1 = b.conv2d("conv1", x, conv(8, 3, seed)).unwrap();
    let n1 = b.batch_norm2d("bn1", c1, BatchNorm2d::new(8)).unwrap();
    let r1 = b.relu("relu1", n1).unwrap();
    let c2 = b.conv2d("conv2", r1, conv(8, 8, seed + 1)).unwrap();
    let s = b.add("add", &[r1, c2]).unwrap();
    let p = b.pool2d("pool", s, Pool2d::max(2, 2)).unwrap();
    let f = b.flatten("flatten", p).unwrap();
    let y = b.linear("fc", f, linear(5, 8 * 9, seed + 2)).unwrap();
    b.output("output", y).unwrap();
    b.build().unwrap()
}

// input[2,6,6] -> conv c(4) -> concat(c, c) -> bn(8) -> add(bn, bn) -> output
fn self_joined(seed: u64) -> Graph {
    let conv = Conv2d::new(Tensor::uniform(&[4, 2, 3, 3], -1.0, 1.0, Some(seed)), None).with_padding(1);
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[2, 6, 6]).unwrap();
    let c = b.conv2d("c", x, conv).unwrap();
    let cat = b.concat("cat", &[c, c]).unwrap();
    let n = b.batch_norm2d("bn", cat, BatchNorm2d::new(8)).unwrap();
    let s = b.add("add", &[n, n]).unwrap();
    b.output("output", s).unwrap();
    b.build().unwrap()
}

fn mask_strategy(len: usize) -> impl Strategy<Value = ChannelMask> {
    proptest::collection::vec(any::<bool>(), len).prop_map(ChannelMask::from_keep)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Allocation
    #[test]
    fn per_layer_prunes_rounded_count(n in 1usize..20, ratio in 0.0f32..0.95, seed in 0u64..1000) {
        let graph = two_linear(n, seed);
        let rules = SparsityConfig::new().with_rule(SparsityRule::per_layer(ratio).op_names(["fc1"]));
        let scorer = ImportanceStrategy::L1Norm.build();
        let allocation = MaskAllocator::new()
            .allocate_graph(&graph, &rules, scorer.as_ref())
            .unwrap();

        let expected = (ratio * n as f32).round() as usize;
        prop_assert_eq!(allocation.get("fc1").unwrap().num_zeros(), expected);
        prop_assert_eq!(allocation.num_zeros(), expected);
    }

    #[test]
    fn exclusion_always_wins(ratio in 0.0f32..0.95, seed in 0u64..1000) {
        let graph = two_linear(8, seed);
        let rules = SparsityConfig::new()
            .with_rule(SparsityRule::exclude().op_names(["fc1"]))
            .with_rule(SparsityRule::per_layer(ratio).op_types([OpType::Linear]));
        let outcome = PruningPipeline::new(PipelineConfig::new(rules))
            .unwrap()
            .run_round(&graph)
            .unwrap();

        prop_assert!(outcome.allocation.get("fc1").is_none());
        prop_assert!(outcome.allocation.is_excluded("fc1"));
        prop_assert_eq!(outcome.graph.get("fc1").unwrap().out_channels(), 8);
    }

    // Resolution
    #[test]
    fn resolution_is_idempotent_and_monotone(
        m1 in mask_strategy(8),
        m2 in mask_strategy(8),
        seed in 0u64..1000,
    ) {
        let graph = residual(seed);
        let mut outputs = BTreeMap::new();
        outputs.insert("conv1".to_string(), m1.clone());
        outputs.insert("conv2".to_string(), m2.clone());

        let resolver = ConflictResolver::new(&graph);
        let first = resolver.resolve_outputs(&outputs).unwrap();
        let second = resolver.resolve(first.masks.clone()).unwrap();
        prop_assert_eq!(&second.masks, &first.masks);

        let conv1 = graph.id_of("conv1").unwrap();
        let conv2 = graph.id_of("conv2").unwrap();
        let r1 = &first.masks.get(conv1).output;
        let r2 = &first.masks.get(conv2).output;
        for j in 0..8 {
            // zeros are never undone
            prop_assert!(m1.is_kept(j) || !r1.is_kept(j));
            prop_assert!(m2.is_kept(j) || !r2.is_kept(j));
            // the residual add ties both producers
            prop_assert_eq!(r1.is_kept(j), r2.is_kept(j));
            prop_assert_eq!(r1.is_kept(j), m1.is_kept(j) && m2.is_kept(j));
        }
        prop_assert!(first.visits <= first.masks.total_positions() + graph.len());
    }

    #[test]
    fn resolution_converges_when_producer_feeds_several_ports(
        mc in mask_strategy(4),
        mb in mask_strategy(8),
        seed in 0u64..1000,
    ) {
        let graph = self_joined(seed);
        let mut outputs = BTreeMap::new();
        outputs.insert("c".to_string(), mc);
        outputs.insert("bn".to_string(), mb);

        let resolver = ConflictResolver::new(&graph);
        let first = resolver.resolve_outputs(&outputs).unwrap();
        let second = resolver.resolve(first.masks.clone()).unwrap();
        prop_assert_eq!(&second.masks, &first.masks);

        let c = &first.masks.get(graph.id_of("c").unwrap()).output;
        let cat = first.masks.get(graph.id_of("cat").unwrap());
        prop_assert_eq!(&cat.inputs[0], c);
        prop_assert_eq!(&cat.inputs[1], c);
        for j in 0..4 {
            prop_assert_eq!(cat.output.is_kept(j), c.is_kept(j));
            prop_assert_eq!(cat.output.is_kept(j + 4), c.is_kept(j));
        }
        if c.num_kept() > 0 {
            prop_assert!(GraphRewriter::new(&graph).rewrite(&first.masks).is_ok());
        }
    }

    // Rewriting
    #[test]
    fn rewrite_keeps_surviving_rows(keep in mask_strategy(8), seed in 0u64..1000) {
        prop_assume!(keep.num_kept() > 0);
        let graph = residual(seed);
        let mut outputs = BTreeMap::new();
        outputs.insert("conv2".to_string(), keep.clone());
        let resolution = ConflictResolver::new(&graph).resolve_outputs(&outputs).unwrap();
        let rewrite = GraphRewriter::new(&graph).rewrite(&resolution.masks).unwrap();

        let (before, after) = match (
            graph.get("conv2").unwrap().op(),
            rewrite.graph.get("conv2").unwrap().op(),
        ) {
            (Op::Conv2d(b), Op::Conv2d(a)) => (b.clone(), a.clone()),
            _ => unreachable!(),
        };
        let kept = keep.kept_indices();
        prop_assert_eq!(after.weight.shape(), &[kept.len(), kept.len(), 3, 3][..]);
        let expected = before
            .weight
            .index_select(0, &kept)
            .unwrap()
            .index_select(1, &kept)
            .unwrap();
        prop_assert_eq!(&after.weight, &expected);
        prop_assert_eq!(
            rewrite.graph.get("fc").unwrap().op(),
            &Op::Linear(Linear::new(
                match graph.get("fc").unwrap().op() {
                    Op::Linear(l) => l.weight.index_select(1, &block_columns(&kept, 9)).unwrap(),
                    _ => unreachable!(),
                },
                None,
            ))
        );
    }
}

/// Flattened feature columns owned by the kept channels.
fn block_columns(kept: &[usize], spatial: usize) -> Vec<usize> {
    kept.iter()
        .flat_map(|&c| c * spatial..(c + 1) * spatial)
        .collect()
}
