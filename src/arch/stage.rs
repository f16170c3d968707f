use log::debug;
use ndarray::Array4;

use super::{
    block::Block,
    layers::{FeatureShape, Layer, LayerInfo, Sequential},
};
use crate::{configs::StageSpec, initialization::LayerVisitor, NetErr, Result};

/// A sequence of blocks sharing the same output channels.
#[derive(Debug, Clone)]
pub struct Stage {
    spec: StageSpec,
    blocks: Vec<Block>,
}

impl Stage {
    /// Builds a stage on top of a map with `in_channels` channels.
    ///
    /// The first block applies the stage's stride and a strided, channel preserving downsample
    /// to its shortcut, fusing `in_channels + spec.channels` channels. The rest run at stride 1,
    /// use their input as shortcut and fuse `2 * spec.channels` channels.
    ///
    /// # Returns
    /// The built stage and the channels it outputs, to be fed to the next stage.
    pub fn build(spec: StageSpec, in_channels: usize) -> Result<(Self, usize)> {
        let StageSpec {
            channels,
            blocks: n,
            stride,
            expansion,
        } = spec;

        let mut blocks = Vec::new();

        let downsample = Sequential::new([
            Layer::pointwise(in_channels, in_channels, stride)?,
            Layer::batch_norm(in_channels)?,
        ]);
        let first = Block::new(
            in_channels,
            channels,
            stride,
            expansion,
            Some(downsample),
            transition(fused_channels(in_channels, channels)?, channels)?,
        )?;

        let mut running = first.out_channels();
        blocks.push(first);

        for _ in 1..n {
            let block = Block::new(
                running,
                channels,
                1,
                expansion,
                None,
                transition(fused_channels(running, channels)?, channels)?,
            )?;

            running = block.out_channels();
            blocks.push(block);
        }

        Ok((Self { spec, blocks }, running))
    }

    pub fn spec(&self) -> StageSpec {
        self.spec
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn in_channels(&self) -> usize {
        self.blocks.first().map_or(0, Block::in_channels)
    }

    pub fn out_channels(&self) -> usize {
        self.spec.channels
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        self.blocks
            .iter()
            .enumerate()
            .try_fold(shape, |shape, (i, block)| {
                block
                    .out_shape(shape)
                    .map_err(|e| e.within(&format!("block {i}")))
            })
    }

    pub fn forward(&self, mut x: Array4<f32>) -> Result<Array4<f32>> {
        for block in &self.blocks {
            x = block.forward(x)?;
        }

        Ok(x)
    }

    pub fn size(&self) -> usize {
        self.blocks.iter().map(Block::size).sum()
    }

    pub fn accept<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        self.blocks
            .iter_mut()
            .try_for_each(|block| block.accept(&mut *visitor))
    }

    pub fn describe(&self, path: &str, out: &mut Vec<LayerInfo>) {
        for (i, block) in self.blocks.iter().enumerate() {
            block.describe(&format!("{path}.blocks.{i}"), out);
        }
    }
}

/// Builds each stage on top of the previous one's output channels.
///
/// # Returns
/// The stages and the channels the last one outputs.
pub fn build_stages(specs: &[StageSpec], in_channels: usize) -> Result<(Vec<Stage>, usize)> {
    specs.iter().enumerate().try_fold(
        (Vec::with_capacity(specs.len()), in_channels),
        |(mut stages, running), (i, &spec)| {
            let (stage, out) =
                Stage::build(spec, running).map_err(|e| e.within(&format!("stage {i}")))?;

            debug!(
                "built stage {i}: {running} -> {out} channels, stride {}, {} blocks",
                spec.stride, spec.blocks
            );

            stages.push(stage);
            Ok((stages, out))
        },
    )
}

/// The channels of a shortcut of `shortcut` channels concatenated to `channels` new ones.
fn fused_channels(shortcut: usize, channels: usize) -> Result<usize> {
    shortcut.checked_add(channels).ok_or_else(|| {
        NetErr::InvalidConfig(format!(
            "concatenating {shortcut} and {channels} channels overflows"
        ))
    })
}

fn transition(in_channels: usize, out_channels: usize) -> Result<Sequential> {
    Ok(Sequential::new([
        Layer::pointwise(in_channels, out_channels, 1)?,
        Layer::batch_norm(out_channels)?,
        Layer::relu(),
    ]))
}
