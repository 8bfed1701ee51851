//! Small networks shared by unit tests.

use crate::graph::{BatchNorm2d, Conv2d, Graph, GraphBuilder, Linear, Pool2d};
use crate::tensor::Tensor;

/// Dense conv whose filter `i` is filled with `row_values[i]`.
pub(crate) fn conv_with_rows(row_values: &[f32], in_channels: usize, k: usize) -> Conv2d {
    let per = in_channels * k * k;
    let data: Vec<f32> = row_values
        .iter()
        .flat_map(|&v| std::iter::repeat(v).take(per))
        .collect();
    let weight = Tensor::new(&data, &[row_values.len(), in_channels, k, k]);
    let bias = Tensor::from_slice(&row_values.iter().map(|v| v * 0.1).collect::<Vec<_>>());
    Conv2d::new(weight, Some(bias))
}

/// Seeded random dense conv.
pub(crate) fn conv(out: usize, input: usize, k: usize, seed: u64) -> Conv2d {
    let weight = Tensor::kaiming_uniform(&[out, input, k, k], input * k * k, Some(seed));
    let bias = Tensor::uniform(&[out], -0.1, 0.1, Some(seed + 1));
    Conv2d::new(weight, Some(bias))
}

/// Seeded random linear layer.
pub(crate) fn linear(out: usize, input: usize, seed: u64) -> Linear {
    let weight = Tensor::kaiming_uniform(&[out, input], input, Some(seed));
    let bias = Tensor::uniform(&[out], -0.1, 0.1, Some(seed + 1));
    Linear::new(weight, Some(bias))
}

/// input[1,7,7] -> conv(6 filters, 3x3) -> relu -> flatten -> fc(10).
///
/// Conv filter `i` has weights equal to `i + 1`, so lower filters score lower.
pub(crate) fn conv_flatten_linear() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[1, 7, 7]).unwrap();
    let c = b
        .conv2d(
            "conv1",
            x,
            conv_with_rows(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 1, 3),
        )
        .unwrap();
    let r = b.relu("relu1", c).unwrap();
    let f = b.flatten("flatten", r).unwrap();
    let y = b.linear("fc", f, linear(10, 6 * 25, 11)).unwrap();
    b.output("output", y).unwrap();
    b.build().unwrap()
}

/// Two-block residual net:
/// input[3,8,8] -> conv1 -> bn1 -> relu1 -> conv2 -> bn2 -> add(relu1, bn2)
/// -> relu2 -> pool -> flatten -> fc(10)
pub(crate) fn residual() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[3, 8, 8]).unwrap();
    let c1 = b.conv2d("conv1", x, conv(8, 3, 3, 1).with_padding(1)).unwrap();
    let n1 = b.batch_norm2d("bn1", c1, BatchNorm2d::new(8)).unwrap();
    let r1 = b.relu("relu1", n1).unwrap();
    let c2 = b.conv2d("conv2", r1, conv(8, 8, 3, 3).with_padding(1)).unwrap();
    let n2 = b.batch_norm2d("bn2", c2, BatchNorm2d::new(8)).unwrap();
    let s = b.add("add", &[r1, n2]).unwrap();
    let r2 = b.relu("relu2", s).unwrap();
    let p = b.pool2d("pool", r2, Pool2d::max(2, 2)).unwrap();
    let f = b.flatten("flatten", p).unwrap();
    let y = b.linear("fc", f, linear(10, 8 * 16, 5)).unwrap();
    b.output("output", y).unwrap();
    b.build().unwrap()
}

/// input[2,6,6] -> {left: conv 4, right: conv 6} -> concat(10) -> head conv 5 -> output
pub(crate) fn concat() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("input", &[2, 6, 6]).unwrap();
    let l = b.conv2d("left", x, conv(4, 2, 3, 21).with_padding(1)).unwrap();
    let r = b.conv2d("right", x, conv(6, 2, 3, 23).with_padding(1)).unwrap();
    let c = b.concat("cat", &[l, r]).unwrap();
    let h = b.conv2d("head", c, conv(5, 10, 1, 25)).unwrap();
    b.output("output", h).unwrap();
    b.build().unwrap()
}
