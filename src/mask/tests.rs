use super::*;
use crate::fixtures;

#[test]
fn test_ones_is_dense() {
    let m = ChannelMask::ones(4);
    assert!(m.is_dense());
    assert_eq!(m.num_kept(), 4);
    assert_eq!(m.sparsity(), 0.0);
    assert!(!m.is_fully_pruned());
}

#[test]
fn test_with_zeros_and_indices() {
    let m = ChannelMask::with_zeros(6, &[1, 4]).unwrap();
    assert_eq!(m.zero_indices(), vec![1, 4]);
    assert_eq!(m.kept_indices(), vec![0, 2, 3, 5]);
    assert!((m.sparsity() - 2.0 / 6.0).abs() < 1e-6);
}

#[test]
fn test_with_zeros_out_of_range() {
    assert!(matches!(
        ChannelMask::with_zeros(3, &[3]),
        Err(PruningError::InvalidMask { .. })
    ));
}

#[test]
fn test_zero_reports_change_once() {
    let mut m = ChannelMask::ones(3);
    assert!(m.zero(1));
    assert!(!m.zero(1));
}

#[test]
fn test_absorb_zeros_is_union() {
    let mut a = ChannelMask::with_zeros(5, &[0]).unwrap();
    let b = ChannelMask::with_zeros(5, &[0, 3]).unwrap();
    assert!(a.absorb_zeros(&b));
    assert_eq!(a.zero_indices(), vec![0, 3]);
    assert!(!a.absorb_zeros(&b), "second absorb must be a no-op");
}

#[test]
fn test_absorb_never_unzeroes() {
    let mut a = ChannelMask::with_zeros(3, &[2]).unwrap();
    a.absorb_zeros(&ChannelMask::ones(3));
    assert_eq!(a.zero_indices(), vec![2]);
}

#[test]
fn test_fully_pruned_and_empty() {
    let m = ChannelMask::with_zeros(2, &[0, 1]).unwrap();
    assert!(m.is_fully_pruned());
    let empty = ChannelMask::ones(0);
    assert!(empty.is_empty());
    assert!(!empty.is_fully_pruned());
    assert_eq!(empty.sparsity(), 0.0);
}

#[test]
fn test_tensor_round_trip_and_validation() {
    let m = ChannelMask::with_zeros(4, &[2]).unwrap();
    let t = m.to_tensor();
    assert_eq!(t.data(), &[1.0, 1.0, 0.0, 1.0]);
    assert_eq!(ChannelMask::from_tensor(&t).unwrap(), m);

    let bad = Tensor::from_slice(&[1.0, 0.5]);
    let err = ChannelMask::from_tensor(&bad).unwrap_err();
    assert!(err.to_string().contains("non-binary"));

    assert!(ChannelMask::from_tensor(&Tensor::ones(&[2, 2])).is_err());
}

#[test]
fn test_dense_set_matches_graph() {
    let graph = fixtures::concat();
    let set = MaskSet::dense(&graph);
    set.validate(&graph).unwrap();
    let cat = graph.id_of("cat").unwrap();
    let m = set.get(cat);
    assert_eq!(m.inputs.len(), 2);
    assert_eq!(m.inputs[0].len(), 4);
    assert_eq!(m.inputs[1].len(), 6);
    assert_eq!(m.output.len(), 10);
}

#[test]
fn test_from_output_masks_validates() {
    let graph = fixtures::conv_flatten_linear();
    let mut outputs = BTreeMap::new();
    outputs.insert("conv1".to_string(), ChannelMask::ones(5));
    assert!(matches!(
        MaskSet::from_output_masks(&graph, &outputs),
        Err(PruningError::ShapeMismatch { .. })
    ));

    let mut unknown = BTreeMap::new();
    unknown.insert("conv9".to_string(), ChannelMask::ones(6));
    assert!(MaskSet::from_output_masks(&graph, &unknown).is_err());

    let mut ok = BTreeMap::new();
    ok.insert("conv1".to_string(), ChannelMask::with_zeros(6, &[0]).unwrap());
    let set = MaskSet::from_output_masks(&graph, &ok).unwrap();
    assert_eq!(
        set.get(graph.id_of("conv1").unwrap()).output.zero_indices(),
        vec![0]
    );
}

#[test]
fn test_named_round_trip() {
    let graph = fixtures::residual();
    let set = MaskSet::dense(&graph);
    let named = set.to_named(&graph);
    assert_eq!(named.len(), graph.len());
    assert_eq!(MaskSet::from_named(&graph, &named).unwrap(), set);
}

#[test]
fn test_layer_masks_serialize() {
    let m = LayerMasks {
        inputs: vec![ChannelMask::ones(2)],
        output: ChannelMask::with_zeros(2, &[1]).unwrap(),
    };
    let json = serde_json::to_string(&m).unwrap();
    let back: LayerMasks = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
    assert!(!back.is_dense());
}
