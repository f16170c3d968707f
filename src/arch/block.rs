use ndarray::{concatenate, Array4, Axis};

use super::layers::{FeatureShape, Layer, LayerInfo, LayerKind, Relu, Sequential};
use crate::{initialization::LayerVisitor, NetErr, Result};

/// Kernel of the depthwise convolution.
const DEPTHWISE_KERNEL: usize = 3;

/// A dense inverted-residual block.
///
/// The input is expanded, mixed spatially per channel and projected back down. Instead of adding
/// the shortcut to the projection, both are concatenated along the channel axis and fused by the
/// transition into the block's output channels.
///
/// ```text
/// x ─┬─ expand ── depthwise ── project ──┐
///    │                                   concat ── relu ── transition ── y
///    └─ [downsample] ────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Block {
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    expansion: usize,
    shortcut_channels: usize,
    transition_channels: (usize, usize),

    expand: Sequential,
    depthwise: Sequential,
    project: Sequential,
    downsample: Option<Sequential>,
    fuse: Relu,
    transition: Sequential,
}

impl Block {
    /// Creates a new `Block`, validating all of its channel arithmetic.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the block's input.
    /// * `out_channels` - The channels of the projection.
    /// * `stride` - The stride of the depthwise convolution.
    /// * `expansion` - The factor the input channels are expanded by.
    /// * `downsample` - Maps the input to the projection's resolution, required unless the stride
    ///   is 1 and the input already has `out_channels` channels.
    /// * `transition` - Fuses the concatenation of the projection and the shortcut.
    ///
    /// # Returns
    /// A new `Block` or a `ChannelMismatch` error if a declared channel count disagrees with what
    /// it would be fed.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        downsample: Option<Sequential>,
        transition: Sequential,
    ) -> Result<Self> {
        if expansion == 0 {
            return Err(NetErr::InvalidConfig(
                "a block can't have an expansion of 0".into(),
            ));
        }

        let hidden = in_channels.checked_mul(expansion).ok_or_else(|| {
            NetErr::InvalidConfig(format!(
                "expanding {in_channels} channels by {expansion} overflows"
            ))
        })?;

        let expand = Sequential::new([
            Layer::pointwise(in_channels, hidden, 1)?,
            Layer::batch_norm(hidden)?,
            Layer::relu(),
        ]);

        let depthwise = Sequential::new([
            Layer::depthwise(hidden, DEPTHWISE_KERNEL, stride, DEPTHWISE_KERNEL / 2)?,
            Layer::batch_norm(hidden)?,
            Layer::relu(),
        ]);

        let project = Sequential::new([
            Layer::pointwise(hidden, out_channels, 1)?,
            Layer::batch_norm(out_channels)?,
        ]);

        let shortcut_channels = match &downsample {
            Some(downsample) => {
                let ds_stride = total_stride(downsample);
                if ds_stride != stride {
                    return Err(NetErr::InvalidConfig(format!(
                        "the downsample reduces by {ds_stride} but the block's stride is {stride}"
                    )));
                }

                downsample
                    .out_channels(in_channels)
                    .map_err(|e| e.within("downsample"))?
            }
            None => {
                if stride != 1 || in_channels != out_channels {
                    return Err(NetErr::ChannelMismatch {
                        what: format!("identity shortcut with stride {stride}"),
                        got: in_channels,
                        expected: out_channels,
                    });
                }

                in_channels
            }
        };

        let concat = out_channels.checked_add(shortcut_channels).ok_or_else(|| {
            NetErr::InvalidConfig(format!(
                "concatenating {out_channels} and {shortcut_channels} channels overflows"
            ))
        })?;
        let fused = transition
            .out_channels(concat)
            .map_err(|e| e.within("transition"))?;

        Ok(Self {
            in_channels,
            out_channels: fused,
            stride,
            expansion,
            shortcut_channels,
            transition_channels: (concat, fused),
            expand,
            depthwise,
            project,
            downsample,
            fuse: Relu::new(),
            transition,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// The channels the block outputs, those of the transition.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn expansion(&self) -> usize {
        self.expansion
    }

    pub fn hidden_channels(&self) -> usize {
        self.in_channels * self.expansion
    }

    pub fn shortcut_channels(&self) -> usize {
        self.shortcut_channels
    }

    /// The declared `(input, output)` channels of the transition.
    pub fn transition_channels(&self) -> (usize, usize) {
        self.transition_channels
    }

    pub fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        let main = self.expand.out_shape(shape)?;
        let main = self.depthwise.out_shape(main)?;
        let main = self.project.out_shape(main)?;

        let shortcut = match &self.downsample {
            Some(downsample) => downsample.out_shape(shape)?,
            None => shape,
        };

        if (main.height, main.width) != (shortcut.height, shortcut.width) {
            return Err(NetErr::InvalidConfig(format!(
                "the shortcut's {}x{} map can't be concatenated to the projection's {}x{}",
                shortcut.height, shortcut.width, main.height, main.width
            )));
        }

        let concat = FeatureShape::new(main.channels + shortcut.channels, main.height, main.width);
        self.transition.out_shape(concat)
    }

    /// Makes a forward pass, evaluating the main path and the shortcut concurrently.
    pub fn forward(&self, x: Array4<f32>) -> Result<Array4<f32>> {
        let input = x.clone();
        let (y, shortcut) = rayon::join(
            move || {
                let y = self.expand.forward(input)?;
                let y = self.depthwise.forward(y)?;
                self.project.forward(y)
            },
            move || match &self.downsample {
                Some(downsample) => downsample.forward(x),
                None => Ok(x),
            },
        );
        let (y, shortcut) = (y?, shortcut?);

        let fused = concatenate(Axis(1), &[y.view(), shortcut.view()])?;
        let fused = self.fuse.forward(fused);
        self.transition.forward(fused)
    }

    pub fn size(&self) -> usize {
        self.sections().map(|(_, seq)| seq.size()).sum()
    }

    pub fn accept<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        self.expand.accept(visitor)?;
        self.depthwise.accept(visitor)?;
        self.project.accept(visitor)?;
        if let Some(downsample) = &mut self.downsample {
            downsample.accept(visitor)?;
        }
        self.transition.accept(visitor)
    }

    pub fn describe(&self, path: &str, out: &mut Vec<LayerInfo>) {
        for (name, seq) in self.sections() {
            seq.describe(&format!("{path}.{name}"), out);
        }
    }

    /// Every sub sequence of the block in forward order.
    fn sections(&self) -> impl Iterator<Item = (&'static str, &Sequential)> {
        [
            ("expand", Some(&self.expand)),
            ("depthwise", Some(&self.depthwise)),
            ("project", Some(&self.project)),
            ("downsample", self.downsample.as_ref()),
            ("transition", Some(&self.transition)),
        ]
        .into_iter()
        .filter_map(|(name, seq)| seq.map(|seq| (name, seq)))
    }
}

/// The total spatial reduction of a sequence, the product of its windowed strides.
fn total_stride(seq: &Sequential) -> usize {
    let mut leaves = Vec::new();
    seq.describe("", &mut leaves);

    leaves
        .iter()
        .map(|info| match info.kind {
            LayerKind::Conv2d { stride, .. } | LayerKind::AvgPool2d { stride, .. } => stride,
            _ => 1,
        })
        .product()
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::initialization::FanOutInit;

    fn downsample(channels: usize, stride: usize) -> Sequential {
        Sequential::new([
            Layer::pointwise(channels, channels, stride).unwrap(),
            Layer::batch_norm(channels).unwrap(),
        ])
    }

    fn transition(in_channels: usize, out_channels: usize) -> Sequential {
        Sequential::new([
            Layer::pointwise(in_channels, out_channels, 1).unwrap(),
            Layer::batch_norm(out_channels).unwrap(),
            Layer::relu(),
        ])
    }

    fn init(block: &mut Block) {
        let mut init = FanOutInit::new(StdRng::seed_from_u64(3));
        block.accept(&mut init).unwrap();
    }

    #[test]
    fn first_block_of_a_stage() {
        let mut block = Block::new(16, 24, 2, 6, Some(downsample(16, 2)), transition(40, 24)).unwrap();
        init(&mut block);

        assert_eq!(block.hidden_channels(), 96);
        assert_eq!(block.shortcut_channels(), 16);
        assert_eq!(block.transition_channels(), (40, 24));
        assert_eq!(block.out_channels(), 24);

        let y = block.forward(Array4::ones((2, 16, 8, 8))).unwrap();
        assert_eq!(y.dim(), (2, 24, 4, 4));
        assert_eq!(
            block.out_shape(FeatureShape::new(16, 8, 8)).unwrap(),
            FeatureShape::new(24, 4, 4)
        );
    }

    #[test]
    fn repeated_block_keeps_its_input_as_shortcut() {
        let mut block = Block::new(24, 24, 1, 6, None, transition(48, 24)).unwrap();
        init(&mut block);

        assert!(!block.has_downsample());
        assert_eq!(block.transition_channels(), (48, 24));

        let y = block.forward(Array4::ones((1, 24, 5, 5))).unwrap();
        assert_eq!(y.dim(), (1, 24, 5, 5));
    }

    #[test]
    fn wrong_transition_width_fails_at_build_time() {
        let err = Block::new(16, 24, 2, 6, Some(downsample(16, 2)), transition(48, 24)).unwrap_err();

        assert!(matches!(
            err,
            NetErr::ChannelMismatch {
                got: 48,
                expected: 40,
                ..
            }
        ));
    }

    #[test]
    fn identity_shortcut_needs_matching_shapes() {
        assert!(matches!(
            Block::new(16, 24, 1, 6, None, transition(40, 24)),
            Err(NetErr::ChannelMismatch { .. })
        ));
        assert!(Block::new(24, 24, 2, 6, None, transition(48, 24)).is_err());
    }

    #[test]
    fn downsample_stride_must_match() {
        assert!(matches!(
            Block::new(16, 24, 2, 6, Some(downsample(16, 1)), transition(40, 24)),
            Err(NetErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn shortcut_resolution_must_match_the_projection() {
        // Same stride, but an unpadded 3x3 window loses a row and a column.
        let downsample = Sequential::new([
            Layer::conv2d(16, 16, (3, 3), 2, 0, 1).unwrap(),
            Layer::batch_norm(16).unwrap(),
        ]);
        let block = Block::new(16, 24, 2, 6, Some(downsample), transition(40, 24)).unwrap();

        assert!(matches!(
            block.out_shape(FeatureShape::new(16, 8, 8)),
            Err(NetErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn overflowing_expansion_is_an_error() {
        let expansion = usize::MAX / 2;
        let result = Block::new(32, 32, 1, expansion, None, transition(64, 32));

        assert!(matches!(result, Err(NetErr::InvalidConfig(_))));
    }

    #[test]
    fn depthwise_is_fully_separable() {
        let block = Block::new(8, 8, 1, 6, Some(downsample(8, 1)), transition(16, 8)).unwrap();

        let mut leaves = vec![];
        block.describe("block", &mut leaves);

        let dw = leaves
            .iter()
            .find(|info| info.path == "block.depthwise.0")
            .unwrap();

        assert_eq!(
            dw.kind,
            LayerKind::Conv2d {
                in_channels: 48,
                out_channels: 48,
                kernel: (3, 3),
                stride: 1,
                padding: 1,
                groups: 48,
            }
        );
    }

    #[test]
    fn visits_every_parameterized_leaf_once() {
        let mut block = Block::new(8, 8, 1, 6, Some(downsample(8, 1)), transition(16, 8)).unwrap();
        let mut init = FanOutInit::new(StdRng::seed_from_u64(0));
        block.accept(&mut init).unwrap();

        // expand, depthwise, project, downsample and transition each hold a conv and a norm.
        assert_eq!(init.visited(), 10);
    }
}
