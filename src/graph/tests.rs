use super::*;
use crate::error::PruningError;
use crate::fixtures;
use crate::tensor::Tensor;

// ==========================================================================
// Construction and shape inference
// ==========================================================================
#[test]
fn test_conv_flatten_linear_shapes() {
    let graph = fixtures::conv_flatten_linear();
    assert_eq!(graph.len(), 6);
    assert_eq!(graph.get("conv1").unwrap().output_shape(), &[6, 5, 5]);
    assert_eq!(graph.get("flatten").unwrap().output_shape(), &[150]);
    assert_eq!(graph.get("fc").unwrap().output_shape(), &[10]);
}

#[test]
fn test_layers_kept_in_insertion_order() {
    let graph = fixtures::residual();
    let names: Vec<&str> = graph.layers().iter().map(Layer::name).collect();
    assert_eq!(
        names,
        [
            "input", "conv1", "bn1", "relu1", "conv2", "bn2", "add", "relu2", "pool", "flatten",
            "fc", "output"
        ]
    );
}

#[test]
fn test_conv_stride_padding_dilation() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[2, 11, 11]).unwrap();
    let conv = Conv2d::new(Tensor::ones(&[3, 2, 3, 3]), None)
        .with_stride(2)
        .with_padding(1)
        .with_dilation(2);
    let c = b.conv2d("c", x, conv).unwrap();
    b.output("output", c).unwrap();
    let graph = b.build().unwrap();
    // effective kernel 5: (11 + 2 - 5) / 2 + 1 = 5
    assert_eq!(graph.get("c").unwrap().output_shape(), &[3, 5, 5]);
}

#[test]
fn test_conv_channel_mismatch_is_tracing_error() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[1, 8, 8]).unwrap();
    let err = b
        .conv2d("conv1", x, Conv2d::new(Tensor::ones(&[4, 3, 3, 3]), None))
        .unwrap_err();
    match err {
        PruningError::GraphTracing { layer, message } => {
            assert_eq!(layer, "conv1");
            assert!(message.contains("3 input channels"));
        }
        other => panic!("expected GraphTracing, got {other:?}"),
    }
}

#[test]
fn test_kernel_larger_than_input() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[1, 2, 2]).unwrap();
    assert!(b
        .conv2d("c", x, Conv2d::new(Tensor::ones(&[1, 1, 3, 3]), None))
        .is_err());
}

#[test]
fn test_grouped_conv_rejected_depthwise_accepted() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[4, 5, 5]).unwrap();
    let grouped = Conv2d::new(Tensor::ones(&[4, 2, 3, 3]), None).with_groups(2);
    assert!(b.conv2d("grouped", x, grouped).is_err());

    let dw = Conv2d::new(Tensor::ones(&[4, 1, 3, 3]), None).with_groups(4);
    let d = b.conv2d("dw", x, dw).unwrap();
    b.output("output", d).unwrap();
    let graph = b.build().unwrap();
    assert_eq!(graph.get("dw").unwrap().output_shape(), &[4, 3, 3]);
    assert_eq!(graph.get("dw").unwrap().op().channel_rule(), ChannelRule::Tied);
}

#[test]
fn test_linear_feature_mismatch() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[12]).unwrap();
    assert!(b
        .linear("fc", x, Linear::new(Tensor::ones(&[4, 10]), None))
        .is_err());
}

#[test]
fn test_bias_length_checked() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[10]).unwrap();
    let bad = Linear::new(Tensor::ones(&[4, 10]), Some(Tensor::ones(&[3])));
    assert!(b.linear("fc", x, bad).is_err());
}

#[test]
fn test_add_requires_equal_shapes() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[4, 3, 3]).unwrap();
    let y = b.input("y", &[5, 3, 3]).unwrap();
    assert!(b.add("sum", &[x, y]).is_err());
    assert!(b.add("single", &[x]).is_err());
}

#[test]
fn test_concat_sums_channels() {
    let graph = fixtures::concat();
    assert_eq!(graph.get("cat").unwrap().output_shape(), &[10, 6, 6]);
    assert_eq!(graph.get("head").unwrap().output_shape(), &[5, 6, 6]);
}

#[test]
fn test_concat_spatial_mismatch() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[4, 3, 3]).unwrap();
    let y = b.input("y", &[4, 2, 3]).unwrap();
    assert!(b.concat("cat", &[x, y]).is_err());
}

#[test]
fn test_duplicate_name_rejected() {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[4]).unwrap();
    b.relu("act", x).unwrap();
    let err = b.relu("act", x).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_build_requires_input_and_output() {
    let b = GraphBuilder::new();
    assert!(b.build().is_err());

    let mut b = GraphBuilder::new();
    b.input("input", &[4]).unwrap();
    assert!(b.build().is_err());
}

#[test]
fn test_input_shape_must_be_nonzero() {
    let mut b = GraphBuilder::new();
    assert!(b.input("input", &[]).is_err());
    assert!(b.input("input", &[3, 0]).is_err());
}

// ==========================================================================
// Traceable
// ==========================================================================
struct TinyMlp {
    hidden: Linear,
    head: Linear,
}

impl Traceable for TinyMlp {
    fn trace(&self, b: &mut GraphBuilder, input: LayerId) -> crate::error::Result<LayerId> {
        let h = b.linear("hidden", input, self.hidden.clone())?;
        let a = b.activation("act", h, ActivationKind::Tanh)?;
        b.linear("head", a, self.head.clone())
    }
}

#[test]
fn test_trace_wraps_input_and_output() {
    let model = TinyMlp {
        hidden: fixtures::linear(16, 8, 1),
        head: fixtures::linear(3, 16, 2),
    };
    let graph = Graph::trace(&model, &[8]).unwrap();
    assert_eq!(graph.layers()[0].op_type(), OpType::Input);
    assert_eq!(graph.layers().last().unwrap().op_type(), OpType::Output);
    assert_eq!(graph.get("act").unwrap().op_type(), OpType::Tanh);
    assert_eq!(graph.get("output").unwrap().output_shape(), &[3]);
}

#[test]
fn test_trace_propagates_model_errors() {
    let model = TinyMlp {
        hidden: fixtures::linear(16, 8, 1),
        head: fixtures::linear(3, 15, 2),
    };
    assert!(matches!(
        Graph::trace(&model, &[8]),
        Err(PruningError::GraphTracing { .. })
    ));
}

struct NamesItsHeadOutput(Linear);

impl Traceable for NamesItsHeadOutput {
    fn trace(&self, b: &mut GraphBuilder, input: LayerId) -> crate::error::Result<LayerId> {
        b.linear("output", input, self.0.clone())
    }
}

#[test]
fn test_trace_named_avoids_reserved_boundary_names() {
    let model = NamesItsHeadOutput(fixtures::linear(3, 8, 1));
    assert!(matches!(
        Graph::trace(&model, &[8]),
        Err(PruningError::GraphTracing { .. })
    ));

    let graph = Graph::trace_named(&model, &[8], "x", "y").unwrap();
    assert_eq!(graph.get("x").unwrap().op_type(), OpType::Input);
    assert_eq!(graph.get("output").unwrap().op_type(), OpType::Linear);
    assert_eq!(graph.get("y").unwrap().output_shape(), &[3]);
}

// ==========================================================================
// Queries
// ==========================================================================
#[test]
fn test_consumers_and_input_shape() {
    let graph = fixtures::residual();
    let relu1 = graph.id_of("relu1").unwrap();
    let consumers: Vec<&str> = graph
        .consumers(relu1)
        .iter()
        .map(|(c, _)| graph.layer(*c).name())
        .collect();
    assert_eq!(consumers, ["conv2", "add"]);

    let fc = graph.id_of("fc").unwrap();
    assert_eq!(graph.input_shape(fc, 0), &[128]);
}

#[test]
fn test_prunable_layers_and_type_filter() {
    let graph = fixtures::residual();
    let prunable: Vec<&str> = graph.prunable_layers().map(Layer::name).collect();
    assert_eq!(prunable, ["conv1", "bn1", "conv2", "bn2", "fc"]);
    assert_eq!(graph.layers_of_type(OpType::Relu).count(), 2);
}

#[test]
fn test_parameter_and_flop_counts() {
    let graph = fixtures::conv_flatten_linear();
    // conv: 6*1*3*3 + 6, fc: 10*150 + 10
    assert_eq!(graph.num_parameters(), 60 + 1510);
    // conv: 150 outputs * 9 MACs + 150 bias; fc: 1500 + 10
    assert_eq!(graph.flops(), 150 * 9 + 150 + 1500 + 10);
}

// ==========================================================================
// Dependency edges
// ==========================================================================
#[test]
fn test_dependency_edge_kinds() {
    let graph = fixtures::conv_flatten_linear();
    let edges = graph.dependency_edges();
    assert_eq!(edges.len(), 5);

    let kind_into = |name: &str| {
        let id = graph.id_of(name).unwrap();
        edges.iter().find(|e| e.consumer == id).unwrap().kind
    };
    assert_eq!(kind_into("conv1"), EdgeKind::Direct);
    assert_eq!(kind_into("relu1"), EdgeKind::PassThrough);
    assert_eq!(kind_into("flatten"), EdgeKind::Flatten { spatial: 25 });
    assert_eq!(kind_into("fc"), EdgeKind::Direct);
    assert_eq!(kind_into("output"), EdgeKind::PassThrough);
}

#[test]
fn test_dependency_edges_cover_every_port() {
    let graph = fixtures::concat();
    let edges = graph.dependency_edges();
    let cat = graph.id_of("cat").unwrap();
    let ports: Vec<usize> = edges
        .iter()
        .filter(|e| e.consumer == cat)
        .map(|e| e.port)
        .collect();
    assert_eq!(ports, [0, 1]);
}

#[test]
fn test_op_type_serde_names() {
    let json = serde_json::to_string(&[OpType::Relu, OpType::BatchNorm2d, OpType::Gelu]).unwrap();
    assert_eq!(json, r#"["ReLU","BatchNorm2d","GELU"]"#);
    let back: OpType = serde_json::from_str(r#""MaxPool2d""#).unwrap();
    assert_eq!(back, OpType::MaxPool2d);
    assert_eq!(OpType::Relu.to_string(), "ReLU");
}
