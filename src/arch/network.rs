use log::{info, trace};
use ndarray::{Array2, Array4, ArrayView4, Axis};
use rand::{rngs::StdRng, SeedableRng};

use super::{
    layers::{BatchNorm2d, Conv2d, FeatureShape, Layer, LayerInfo, Sequential},
    stage::{build_stages, Stage},
};
use crate::{
    configs::{
        HeadPoolSpec, NetConfig, HEAD_CHANNELS, HEAD_IN, HEAD_POOL_WINDOW, INPUT_CHANNELS,
        STEM_CHANNELS,
    },
    initialization::{FanOutInit, LayerVisitor},
    NetErr, Result,
};

/// A MobileNetV2-like network whose blocks fuse their shortcut by concatenation.
///
/// ```text
/// stem ── stages ── projection ── pool ── classifier ── flatten
/// ```
#[derive(Debug, Clone)]
pub struct MobDenseNet {
    num_classes: usize,
    stem: Sequential,
    stages: Vec<Stage>,
    projection: Layer,
    pool: Layer,
    classifier: Layer,
}

impl MobDenseNet {
    /// Builds the topology described by `config` with every parameter set to zero.
    ///
    /// # Returns
    /// The network or an error if the configuration is invalid or its channels don't add up.
    pub fn new(config: &NetConfig) -> Result<Self> {
        config.validate()?;

        let stem = Sequential::new([
            Layer::conv2d(INPUT_CHANNELS, STEM_CHANNELS, (3, 3), 2, 1, 1)?,
            Layer::batch_norm(STEM_CHANNELS)?,
            Layer::relu(),
        ]);

        let (stages, out) = build_stages(&config.stages, STEM_CHANNELS)?;

        let projection = Layer::pointwise(HEAD_IN, HEAD_CHANNELS, 1)?;
        projection
            .out_channels(out)
            .map_err(|e| e.within("head projection"))?;

        let pool = match config.head_pool {
            HeadPoolSpec::Global => Layer::global_avg_pool(HEAD_POOL_WINDOW),
            HeadPoolSpec::Window { kernel, stride } => Layer::avg_pool(kernel, stride)?,
        };

        let classifier = Layer::pointwise(HEAD_CHANNELS, config.num_classes, 1)?;

        let net = Self {
            num_classes: config.num_classes,
            stem,
            stages,
            projection,
            pool,
            classifier,
        };

        info!(
            "built a network of {} stages and {} parameters",
            net.stages.len(),
            net.num_params()
        );

        Ok(net)
    }

    /// Builds the topology and initializes it with `FanOutInit`, seeded by the configuration.
    pub fn from_config(config: &NetConfig) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut net = Self::new(config)?;
        net.initialize(&mut FanOutInit::new(rng))?;
        Ok(net)
    }

    /// Hands every parameterized operator to `visitor`, in forward order.
    pub fn initialize<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        let mut counted = Counted {
            inner: visitor,
            visited: 0,
        };
        self.accept(&mut counted)?;

        info!("initialized {} operators", counted.visited);
        Ok(())
    }

    pub fn accept<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        self.stem.accept(visitor)?;
        for stage in &mut self.stages {
            stage.accept(visitor)?;
        }
        self.projection.accept(visitor)?;
        self.pool.accept(visitor)?;
        self.classifier.accept(visitor)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the amount of learnable parameters of the network.
    pub fn num_params(&self) -> usize {
        self.stem.size()
            + self.stages.iter().map(Stage::size).sum::<usize>()
            + self.projection.size()
            + self.classifier.size()
    }

    /// Computes the shape of the classifier's output for an input of the given shape.
    ///
    /// # Returns
    /// The shape or the error `forward` would fail with on such an input.
    pub fn output_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        if shape.channels != INPUT_CHANNELS {
            return Err(NetErr::InvalidInput {
                what: "channels",
                got: shape.channels,
                expected: INPUT_CHANNELS,
            });
        }

        let shape = self.stem.out_shape(shape).map_err(|e| e.within("stem"))?;
        let shape = self
            .stages
            .iter()
            .enumerate()
            .try_fold(shape, |shape, (i, stage)| {
                stage
                    .out_shape(shape)
                    .map_err(|e| e.within(&format!("stage {i}")))
            })?;

        let shape = self.projection.out_shape(shape)?;
        let shape = self.pool.out_shape(shape).map_err(|e| e.within("head"))?;
        self.classifier.out_shape(shape)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - A `(batch, 3, height, width)` tensor.
    ///
    /// # Returns
    /// A `(batch, features)` tensor, `features` being `num_classes` unless a windowed head pool
    /// leaves more than one cell, or an error if `x` is too small for the network.
    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let out = self.output_shape(FeatureShape::of(&x))?;
        let batch = x.len_of(Axis(0));

        let mut y = self.stem.forward(x.to_owned())?;
        for stage in &self.stages {
            y = stage.forward(y)?;
        }
        let y = self.projection.forward(y)?;
        let y = self.pool.forward(y)?;
        let y: Array4<f32> = self.classifier.forward(y)?;

        trace!("forward pass: {:?} -> {:?}", x.dim(), y.dim());

        Ok(y.into_shape_with_order((batch, out.len()))?)
    }

    /// Describes every leaf operator of the network, in forward order.
    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut out = Vec::new();

        self.stem.describe("stem", &mut out);
        for (i, stage) in self.stages.iter().enumerate() {
            stage.describe(&format!("stages.{i}"), &mut out);
        }
        self.projection.describe("projection", &mut out);
        self.pool.describe("pool", &mut out);
        self.classifier.describe("classifier", &mut out);

        out
    }
}

/// Forwards every visit to `inner`, counting them.
struct Counted<'a, V: ?Sized> {
    inner: &'a mut V,
    visited: usize,
}

impl<V: LayerVisitor + ?Sized> LayerVisitor for Counted<'_, V> {
    fn visit_conv2d(&mut self, conv: &mut Conv2d) -> Result<()> {
        self.visited += 1;
        self.inner.visit_conv2d(conv)
    }

    fn visit_batch_norm(&mut self, norm: &mut BatchNorm2d) -> Result<()> {
        self.visited += 1;
        self.inner.visit_batch_norm(norm)
    }
}

/// Builds the reference network, initialized with fan-out scaled weights.
///
/// # Arguments
/// * `num_classes` - The classifier's outputs, 1000 if none.
pub fn mobdensenet_v1(num_classes: Option<usize>) -> Result<MobDenseNet> {
    let config = match num_classes {
        Some(n) => NetConfig::with_classes(n),
        None => NetConfig::default(),
    };

    MobDenseNet::from_config(&config)
}
