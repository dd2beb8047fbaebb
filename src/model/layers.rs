//! Layers of the native differentiation engine.
//!
//! Every layer is stateless apart from its frozen parameters: `forward` maps an
//! input to an output and `backward` maps the gradient with respect to that
//! output to the gradient with respect to the input. No parameter gradients are
//! computed.

use ndarray::{s, Array1, Array2, Array4, ArrayView2, Ix2, Ix4};
use rand::Rng;

use super::{as_nhwc, ActFn, Tensor};
use crate::error::{Error, Result};

/// A layer of a [`Sequential`](super::Sequential) model.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    Dense(Dense),
    MaxPool2d(MaxPool2d),
}

impl Layer {
    /// Shape of the output produced for an input of shape `input`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the layer cannot accept `input`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Self::Conv2d(l) => l.output_shape(input),
            Self::Dense(l) => l.output_shape(input),
            Self::MaxPool2d(l) => l.output_shape(input),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `x` has the wrong shape.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Conv2d(l) => l.forward(x),
            Self::Dense(l) => l.forward(x),
            Self::MaxPool2d(l) => l.forward(x),
        }
    }

    /// Gradient with respect to `x`, given the recorded output `out` and the
    /// gradient `grad` with respect to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the tensors do not line up.
    pub fn backward(&self, x: &Tensor, out: &Tensor, grad: Tensor) -> Result<Tensor> {
        match self {
            Self::Conv2d(l) => l.backward(x, out, grad),
            Self::Dense(l) => l.backward(x, out, grad),
            Self::MaxPool2d(l) => l.backward(x, grad),
        }
    }
}

impl From<Conv2d> for Layer {
    fn from(layer: Conv2d) -> Self {
        Self::Conv2d(layer)
    }
}

impl From<Dense> for Layer {
    fn from(layer: Dense) -> Self {
        Self::Dense(layer)
    }
}

impl From<MaxPool2d> for Layer {
    fn from(layer: MaxPool2d) -> Self {
        Self::MaxPool2d(layer)
    }
}

/// 2D convolution over NHWC tensors with stride 1 and "same" zero padding.
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// `[kernel_height, kernel_width, in_channels, out_channels]`.
    kernel: Array4<f32>,
    bias: Array1<f32>,
    act_fn: Option<ActFn>,
}

impl Conv2d {
    /// Create a convolution from explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel is not odd-sized or the bias does not
    /// have one entry per output channel.
    pub fn new(kernel: Array4<f32>, bias: Array1<f32>, act_fn: Option<ActFn>) -> Result<Self> {
        let (kh, kw, _, cout) = kernel.dim();

        if kh % 2 == 0 || kw % 2 == 0 {
            return Err(Error::invalid_parameter(
                "kernel",
                format!("height and width must be odd, got {kh}x{kw}"),
            ));
        }

        if bias.len() != cout {
            return Err(Error::shape_mismatch(&[cout], bias.shape()));
        }

        Ok(Self {
            kernel,
            bias,
            act_fn,
        })
    }

    /// Create a `size`x`size` convolution with Glorot-uniform weights and zero bias.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is even.
    #[allow(clippy::cast_precision_loss)]
    pub fn glorot<R: Rng>(
        size: usize,
        in_channels: usize,
        out_channels: usize,
        act_fn: Option<ActFn>,
        rng: &mut R,
    ) -> Result<Self> {
        let limit = (6.0 / (size * size * (in_channels + out_channels)) as f32).sqrt();
        let kernel = Array4::from_shape_fn((size, size, in_channels, out_channels), |_| {
            rng.random::<f32>().mul_add(2.0 * limit, -limit)
        });

        Self::new(kernel, Array1::zeros(out_channels), act_fn)
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (_, _, cin, cout) = self.kernel.dim();

        match input {
            &[n, h, w, c] if c == cin => Ok(vec![n, h, w, cout]),
            _ => Err(Error::ShapeMismatch {
                expected: format!("[N, H, W, {cin}]"),
                actual: format!("{input:?}"),
            }),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.output_shape(x.shape())?;
        let x = as_nhwc(x)?;

        let (n, h, w, _) = x.dim();
        let (kh, kw, _, cout) = self.kernel.dim();
        let mut z = Array4::<f32>::zeros((n, h, w, cout));

        for b in 0..n {
            for y in 0..h {
                for col in 0..w {
                    let mut acc = self.bias.clone();
                    for (dy, dx, sy, sx) in taps(y, col, (kh, kw), (h, w)) {
                        acc += &x
                            .slice(s![b, sy, sx, ..])
                            .dot(&self.kernel.slice(s![dy, dx, .., ..]));
                    }
                    z.slice_mut(s![b, y, col, ..]).assign(&acc);
                }
            }
        }

        if let Some(act_fn) = self.act_fn {
            z.mapv_inplace(|v| act_fn.f(v));
        }

        Ok(z.into_dyn())
    }

    pub fn backward(&self, x: &Tensor, out: &Tensor, grad: Tensor) -> Result<Tensor> {
        let x = as_nhwc(x)?;
        let out = as_nhwc(out)?;
        let mut d = into_nhwc(grad)?;

        if d.dim() != out.dim() {
            return Err(Error::shape_mismatch(out.shape(), d.shape()));
        }

        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&out, |d, &a| *d *= act_fn.df(a));
        }

        let (n, h, w, _) = x.dim();
        let (kh, kw, cin, _) = self.kernel.dim();
        let mut dx = Array4::<f32>::zeros((n, h, w, cin));

        for b in 0..n {
            for y in 0..h {
                for col in 0..w {
                    let g = d.slice(s![b, y, col, ..]);
                    for (dy, ddx, sy, sx) in taps(y, col, (kh, kw), (h, w)) {
                        let contribution = self.kernel.slice(s![dy, ddx, .., ..]).dot(&g);
                        let mut cell = dx.slice_mut(s![b, sy, sx, ..]);
                        cell += &contribution;
                    }
                }
            }
        }

        Ok(dx.into_dyn())
    }
}

/// Kernel taps `(dy, dx, source_y, source_x)` of output pixel `(y, x)` that
/// fall inside the image.
fn taps(
    y: usize,
    x: usize,
    (kh, kw): (usize, usize),
    (h, w): (usize, usize),
) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let (ph, pw) = (kh / 2, kw / 2);

    (0..kh)
        .flat_map(move |dy| (0..kw).map(move |dx| (dy, dx)))
        .filter_map(move |(dy, dx)| {
            let sy = (y + dy).checked_sub(ph).filter(|&sy| sy < h)?;
            let sx = (x + dx).checked_sub(pw).filter(|&sx| sx < w)?;
            Some((dy, dx, sy, sx))
        })
}

/// Fully connected layer over the flattened non-batch axes.
#[derive(Debug, Clone)]
pub struct Dense {
    /// `[features, units]`.
    weights: Array2<f32>,
    bias: Array1<f32>,
    act_fn: Option<ActFn>,
}

impl Dense {
    /// Create a dense layer from explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the bias does not have one entry per unit.
    pub fn new(weights: Array2<f32>, bias: Array1<f32>, act_fn: Option<ActFn>) -> Result<Self> {
        if bias.len() != weights.ncols() {
            return Err(Error::shape_mismatch(&[weights.ncols()], bias.shape()));
        }

        Ok(Self {
            weights,
            bias,
            act_fn,
        })
    }

    /// Create a dense layer with Glorot-uniform weights and zero bias.
    #[allow(clippy::cast_precision_loss)]
    pub fn glorot<R: Rng>(
        features: usize,
        units: usize,
        act_fn: Option<ActFn>,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (features + units) as f32).sqrt();
        let weights = Array2::from_shape_fn((features, units), |_| {
            rng.random::<f32>().mul_add(2.0 * limit, -limit)
        });

        Self {
            weights,
            bias: Array1::zeros(units),
            act_fn,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let features: usize = input.iter().skip(1).product();

        if input.len() < 2 || features != self.weights.nrows() {
            return Err(Error::ShapeMismatch {
                expected: format!("[N, ...] with {} features", self.weights.nrows()),
                actual: format!("{input:?}"),
            });
        }

        Ok(vec![input[0], self.weights.ncols()])
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape(x.shape())?;

        let flat = x
            .to_shape((shape[0], self.weights.nrows()))
            .map_err(|_| Error::shape_mismatch(&[shape[0], self.weights.nrows()], x.shape()))?;

        let mut z = flat.dot(&self.weights);
        z += &self.bias;

        if let Some(act_fn) = self.act_fn {
            z.mapv_inplace(|v| act_fn.f(v));
        }

        Ok(z.into_dyn())
    }

    pub fn backward(&self, x: &Tensor, out: &Tensor, grad: Tensor) -> Result<Tensor> {
        let out: ArrayView2<'_, f32> =
            out.view()
                .into_dimensionality::<Ix2>()
                .map_err(|_| Error::ShapeMismatch {
                    expected: format!("[N, {}]", self.weights.ncols()),
                    actual: format!("{:?}", out.shape()),
                })?;

        let mut d = grad
            .into_dimensionality::<Ix2>()
            .map_err(|err| Error::ShapeMismatch {
                expected: "2D gradient".to_string(),
                actual: err.to_string(),
            })?;

        if d.dim() != out.dim() {
            return Err(Error::shape_mismatch(out.shape(), d.shape()));
        }

        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&out, |d, &a| *d *= act_fn.df(a));
        }

        let dx = d.dot(&self.weights.t());
        let flat_shape = dx.shape().to_vec();

        dx.into_shape_with_order(x.shape().to_vec())
            .map_err(|_| Error::shape_mismatch(x.shape(), &flat_shape))
    }
}

/// Max pooling over non-overlapping `size`x`size` windows.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    size: usize,
}

impl MaxPool2d {
    /// # Errors
    ///
    /// Returns an error if `size` is zero.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_parameter("pool size", "must be greater than 0"));
        }

        Ok(Self { size })
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let p = self.size;

        match input {
            &[n, h, w, c] if h >= p && w >= p => Ok(vec![n, h / p, w / p, c]),
            _ => Err(Error::ShapeMismatch {
                expected: format!("[N, H >= {p}, W >= {p}, C]"),
                actual: format!("{input:?}"),
            }),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape(x.shape())?;
        let x = as_nhwc(x)?;
        let p = self.size;

        let out = Array4::from_shape_fn((shape[0], shape[1], shape[2], shape[3]), |(b, y, col, c)| {
            x.slice(s![b, y * p..(y + 1) * p, col * p..(col + 1) * p, c])
                .fold(f32::NEG_INFINITY, |m, &v| m.max(v))
        });

        Ok(out.into_dyn())
    }

    /// Routes each output gradient to the first maximum of its window.
    pub fn backward(&self, x: &Tensor, grad: Tensor) -> Result<Tensor> {
        let shape = self.output_shape(x.shape())?;
        let x = as_nhwc(x)?;
        let d = into_nhwc(grad)?;
        let p = self.size;

        if d.shape() != shape.as_slice() {
            return Err(Error::shape_mismatch(&shape, d.shape()));
        }

        let mut dx = Array4::<f32>::zeros(x.raw_dim());

        for ((b, y, col, c), &g) in d.indexed_iter() {
            let window = x.slice(s![b, y * p..(y + 1) * p, col * p..(col + 1) * p, c]);
            let ((wy, wx), _) = window.indexed_iter().fold(
                ((0, 0), f32::NEG_INFINITY),
                |best, (idx, &v)| if v > best.1 { (idx, v) } else { best },
            );
            dx[[b, y * p + wy, col * p + wx, c]] += g;
        }

        Ok(dx.into_dyn())
    }
}

fn into_nhwc(tensor: Tensor) -> Result<Array4<f32>> {
    let ndim = tensor.ndim();

    tensor
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::ShapeMismatch {
            expected: "4D NHWC tensor".to_string(),
            actual: format!("{ndim}D tensor"),
        })
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, Array, Dimension};
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn ramp(shape: &[usize]) -> Tensor {
        let len: usize = shape.iter().product();
        Array::linspace(-1.0_f32, 1.0, len)
            .into_shape_with_order(shape.to_vec())
            .unwrap()
    }

    /// Sum of `out * weights` so every output element has a distinct gradient.
    fn weighted_sum(out: &Tensor, weights: &Tensor) -> f32 {
        (out * weights).sum()
    }

    /// Compare `backward` against central finite differences of `weighted_sum`.
    fn check_input_gradient(layer: &Layer, x: &Tensor) {
        let out = layer.forward(x).unwrap();
        let weights = ramp(out.shape()).mapv(|v| v + 1.5);
        let grad = layer.backward(x, &out, weights.clone()).unwrap();
        assert_eq!(grad.shape(), x.shape());

        let h = 1e-2;
        for (idx, &analytic) in grad.indexed_iter() {
            let mut plus = x.clone();
            plus[idx.slice()] += h;
            let mut minus = x.clone();
            minus[idx.slice()] -= h;

            let numeric = (weighted_sum(&layer.forward(&plus).unwrap(), &weights)
                - weighted_sum(&layer.forward(&minus).unwrap(), &weights))
                / (2.0 * h);

            assert!(
                (analytic - numeric).abs() < 1e-2,
                "gradient mismatch at {idx:?}: {analytic} vs {numeric}"
            );
        }
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let mut kernel = Array4::<f32>::zeros((3, 3, 1, 1));
        kernel[[1, 1, 0, 0]] = 1.0;
        let conv = Conv2d::new(kernel, arr1(&[0.5]), None).unwrap();

        let x = ramp(&[1, 4, 4, 1]);
        let out = conv.forward(&x).unwrap();

        assert_eq!(out.shape(), &[1, 4, 4, 1]);
        assert!((out[[0, 2, 3, 0]] - (x[[0, 2, 3, 0]] + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_conv2d_rejects_wrong_channels() {
        let mut rng = StdRng::seed_from_u64(1);
        let conv = Conv2d::glorot(3, 3, 4, None, &mut rng).unwrap();

        assert!(matches!(
            conv.forward(&Tensor::zeros(vec![1, 4, 4, 2])),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv2d_rejects_even_kernel() {
        let result = Conv2d::new(Array4::zeros((2, 2, 1, 1)), arr1(&[0.0]), None);
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_conv2d_gradient() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer =
            Layer::from(Conv2d::glorot(3, 2, 3, Some(ActFn::sigmoid(1.0)), &mut rng).unwrap());

        check_input_gradient(&layer, &ramp(&[1, 3, 4, 2]));
    }

    #[test]
    fn test_dense_forward() {
        let dense = Dense::new(arr2(&[[1.0], [2.0], [3.0], [4.0]]), arr1(&[1.0]), None).unwrap();
        let x = Tensor::ones(vec![1, 2, 2, 1]);

        let out = dense.forward(&x).unwrap();

        assert_eq!(out.shape(), &[1, 1]);
        assert!((out[[0, 0]] - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_dense_gradient() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Layer::from(Dense::glorot(12, 4, Some(ActFn::sigmoid(2.0)), &mut rng));

        check_input_gradient(&layer, &ramp(&[1, 2, 2, 3]));
    }

    #[test]
    fn test_max_pool_routes_gradient_to_maximum() {
        let pool = MaxPool2d::new(2).unwrap();
        let x = ramp(&[1, 2, 2, 1]);

        let out = pool.forward(&x).unwrap();
        assert_eq!(out.shape(), &[1, 1, 1, 1]);
        assert!((out[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);

        let grad = pool.backward(&x, Tensor::from_elem(vec![1, 1, 1, 1], 3.0)).unwrap();
        assert!((grad[[0, 1, 1, 0]] - 3.0).abs() < 1e-6);
        assert!((grad.sum() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_max_pool_rejects_zero_size() {
        assert!(MaxPool2d::new(0).is_err());
    }
}
