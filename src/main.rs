use std::{env, fs};

use anyhow::Context;
use log::info;
use mobdensenet::{arch::layers::FeatureShape, MobDenseNet, NetConfig};
use ndarray::Array4;
use ndarray_rand::{rand_distr::Uniform, RandomExt};

const BATCH: usize = 2;
const SIDE: usize = 224;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            NetConfig::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => NetConfig::default(),
    };

    let net = MobDenseNet::from_config(&config)?;

    let input = FeatureShape::new(3, SIDE, SIDE);
    let expected = net.output_shape(input)?;
    info!("{input:?} -> {expected:?}");

    let x: Array4<f32> =
        Array4::random((BATCH, input.channels, SIDE, SIDE), Uniform::new(0., 1.)?);
    let y = net.forward(x.view())?;

    info!(
        "output shape {:?}, {} parameters",
        y.dim(),
        net.num_params()
    );
    Ok(())
}
