#![cfg(test)]

use ndarray::Array4;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    arch::{
        layers::{BatchNorm2d, Conv2d, FeatureShape, LayerKind},
        MobDenseNet,
    },
    configs::{NetConfig, StageSpec, STEM_CHANNELS, V1_STAGES},
    initialization::{FanOutInit, LayerVisitor},
    mobdensenet_v1, NetErr, Result,
};

/// Records the statistics of every parameterized operator it's handed.
#[derive(Default)]
struct Probe {
    convs: Vec<(usize, f32, f32)>,
    norms: Vec<(bool, bool)>,
}

impl LayerVisitor for Probe {
    fn visit_conv2d(&mut self, conv: &mut Conv2d) -> Result<()> {
        let (kh, kw) = conv.kernel();
        let w = conv.weight();
        let n = w.len() as f32;
        let mean = w.sum() / n;
        let var = w.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let expected = 2. / (kh * kw * conv.out_channels()) as f32;

        self.convs.push((w.len(), var, expected));
        Ok(())
    }

    fn visit_batch_norm(&mut self, norm: &mut BatchNorm2d) -> Result<()> {
        self.norms.push((
            norm.weight().iter().all(|&w| w == 1.),
            norm.bias().iter().all(|&b| b == 0.),
        ));
        Ok(())
    }
}

fn seeded(num_classes: usize, seed: u64) -> MobDenseNet {
    let config = NetConfig {
        seed: Some(seed),
        ..NetConfig::with_classes(num_classes)
    };

    MobDenseNet::from_config(&config).unwrap()
}

#[test]
fn test_v1_builds_with_the_reference_schedule() {
    let net = mobdensenet_v1(None).unwrap();

    assert_eq!(net.num_classes(), 1000);
    assert_eq!(net.stages().len(), 7);

    let blocks: Vec<_> = net.stages().iter().map(|s| s.blocks().len()).collect();
    assert_eq!(blocks, [1, 2, 3, 4, 3, 3, 1]);

    let mut running = STEM_CHANNELS;
    for (stage, spec) in net.stages().iter().zip(V1_STAGES) {
        let t = spec.channels;
        assert_eq!(stage.blocks()[0].transition_channels(), (running + t, t));
        for block in &stage.blocks()[1..] {
            assert_eq!(block.transition_channels(), (2 * t, t));
        }
        running = t;
    }
}

#[test]
fn test_forward_224_batch_of_two() {
    let net = seeded(1000, 0);
    let x = Array4::from_elem((2, 3, 224, 224), 0.5);

    let y = net.forward(x.view()).unwrap();

    assert_eq!(y.dim(), (2, 1000));
    assert!(y.iter().all(|v| v.is_finite()));
    assert_eq!(
        net.output_shape(FeatureShape::new(3, 224, 224)).unwrap(),
        FeatureShape::new(1000, 1, 1)
    );
}

#[test]
fn test_forward_128_reaches_the_pool_with_a_4x4_map() {
    let net = seeded(10, 1);
    let y = net.forward(Array4::ones((1, 3, 128, 128)).view()).unwrap();

    assert_eq!(y.dim(), (1, 10));
}

#[test]
fn test_too_small_input_fails_before_evaluating() {
    let net = MobDenseNet::new(&NetConfig::default()).unwrap();

    assert!(matches!(
        net.forward(Array4::zeros((1, 3, 64, 64)).view()),
        Err(NetErr::SpatialCollapse { .. })
    ));
    assert!(net.output_shape(FeatureShape::new(3, 127, 127)).is_ok());
}

#[test]
fn test_num_classes_only_changes_the_classifier() {
    let a = MobDenseNet::new(&NetConfig::with_classes(1000)).unwrap().layers();
    let b = MobDenseNet::new(&NetConfig::with_classes(10)).unwrap().layers();

    assert_eq!(a.len(), b.len());

    let (last_a, rest_a) = a.split_last().unwrap();
    let (last_b, rest_b) = b.split_last().unwrap();
    assert_eq!(rest_a, rest_b);

    assert_eq!(last_a.path, "classifier");
    match (last_a.kind, last_b.kind) {
        (
            LayerKind::Conv2d {
                out_channels: 1000,
                in_channels: in_a,
                ..
            },
            LayerKind::Conv2d {
                out_channels: 10,
                in_channels: in_b,
                ..
            },
        ) => assert_eq!(in_a, in_b),
        kinds => panic!("unexpected classifiers {kinds:?}"),
    }
}

#[test]
fn test_building_twice_is_structurally_identical() {
    let a = seeded(1000, 1);
    let b = seeded(1000, 2);

    assert_eq!(a.layers(), b.layers());
    assert_eq!(a.num_params(), b.num_params());
}

#[test]
fn test_initialization_policy() {
    let mut net = seeded(1000, 42);
    let mut probe = Probe::default();
    net.accept(&mut probe).unwrap();

    let mut checked = 0;
    for (len, var, expected) in probe.convs {
        if len >= 20_000 {
            assert!(
                (var - expected).abs() / expected < 0.1,
                "variance {var} too far from {expected} over {len} weights"
            );
            checked += 1;
        }
    }
    assert!(checked > 10);

    assert!(!probe.norms.is_empty());
    assert!(probe.norms.iter().all(|&(w, b)| w && b));
}

#[test]
fn test_initialization_visits_every_operator_once() {
    let mut net = MobDenseNet::new(&NetConfig::default()).unwrap();
    let mut init = FanOutInit::new(StdRng::seed_from_u64(0));
    net.initialize(&mut init).unwrap();

    let expected = net
        .layers()
        .iter()
        .filter(|info| info.kind.is_parameterized())
        .count();

    assert_eq!(init.visited(), expected);
}

#[test]
fn test_stride_one_stages_keep_their_downsample() {
    let net = MobDenseNet::new(&NetConfig::default()).unwrap();

    for i in [4, 6] {
        let first = &net.stages()[i].blocks()[0];
        assert_eq!(first.stride(), 1);
        assert!(first.has_downsample());
    }
}

#[test]
fn test_mismatched_last_stage_fails_at_build_time() {
    let mut stages = V1_STAGES.to_vec();
    stages[6] = StageSpec::new(256, 1, 1, 6);

    let config = NetConfig {
        stages,
        ..Default::default()
    };

    assert!(matches!(
        MobDenseNet::new(&config),
        Err(NetErr::ChannelMismatch { .. })
    ));
}

#[test]
fn test_oversized_configs_fail_without_panicking() {
    let json = r#"{ "stages": [{ "channels": 320, "blocks": 100000000000000000, "stride": 1, "expansion": 1 }] }"#;
    assert!(matches!(
        NetConfig::from_json(json),
        Err(NetErr::InvalidConfig(_))
    ));

    let json = r#"{ "stages": [{ "channels": 320, "blocks": 1, "stride": 1, "expansion": 4611686018427387904 }] }"#;
    let config = NetConfig::from_json(json).unwrap();
    assert!(matches!(
        MobDenseNet::new(&config),
        Err(NetErr::InvalidConfig(_))
    ));

    let config = NetConfig {
        stages: vec![StageSpec::new(usize::MAX / 8, 1, 1, 1)],
        ..Default::default()
    };
    assert!(matches!(
        MobDenseNet::new(&config),
        Err(NetErr::InvalidConfig(_))
    ));
}
