mod common;

use std::time::Duration;

use common::{context, quantum, silence, with_registry};
use fxlet_engine::bridge::{Binding, ParamSpec, Unit};
use fxlet_engine::dsp::bit_crusher;
use fxlet_engine::effects::BitCrusher;
use fxlet_engine::{BridgeError, EffectDescriptor, EffectNode, NodeOptions, ParamCell, ReadyState, ScopeRegistry};

static CRUSHER_WITH_DRIVE: EffectDescriptor = EffectDescriptor {
    processor: bit_crusher::PROCESSOR_NAME,
    params: &[
        ParamSpec::automated("bits", Unit::Bits, 1.0, 16.0, 4.0),
        ParamSpec::automated("drive", Unit::NormalRange, 0.0, 1.0, 0.5),
    ],
    crossfade: true,
};

static DRY_LESS_CRUSHER: EffectDescriptor = EffectDescriptor {
    processor: bit_crusher::PROCESSOR_NAME,
    params: &[ParamSpec::automated("bits", Unit::Bits, 1.0, 16.0, 4.0)],
    crossfade: false,
};

static REVERB: EffectDescriptor = EffectDescriptor { processor: "reverb", params: &[], crossfade: true };

#[test]
fn concurrent_nodes_share_one_install() {
    let (ctx, _r) = context(48_000.0, 2);
    let nodes: Vec<BitCrusher> = (0..8).map(|_| BitCrusher::new(&ctx, NodeOptions::new()).unwrap()).collect();
    for node in &nodes {
        assert_eq!(node.ready().wait(), Ok(()));
    }
    assert_eq!(ctx.module_installs(), 1);
    assert!(ctx.is_installed());
}

#[test]
fn broken_scope_rejects_readiness() {
    let mut registry = ScopeRegistry::new();
    registry.register_processor(bit_crusher::PROCESSOR_NAME, &bit_crusher::CLASS).unwrap();
    let (ctx, _r) = with_registry(48_000.0, 1, registry);

    let node = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    let err = node.ready().wait().unwrap_err();
    assert!(matches!(err, BridgeError::ModuleLoadFailure(_)), "{err:?}");
    assert!(matches!(node.ready().status(), ReadyState::Failed(_)));
    assert_eq!(ctx.module_installs(), 0);
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn unknown_processor_rejects_readiness() {
    let (ctx, _r) = context(48_000.0, 1);
    let node = EffectNode::new(&ctx, &REVERB, NodeOptions::new()).unwrap();
    assert_eq!(node.ready().wait(), Err(BridgeError::UnknownProcessor("reverb".into())));
}

#[test]
fn unknown_parameters_are_rejected() {
    let (ctx, _r) = context(48_000.0, 1);
    let err = BitCrusher::new(&ctx, NodeOptions::new().param("feedback", 0.2)).err();
    assert_eq!(err, Some(BridgeError::UnknownParameter("feedback".into())));

    let err = EffectNode::new(&ctx, &DRY_LESS_CRUSHER, NodeOptions::new().param("wet", 0.2)).err();
    assert_eq!(err, Some(BridgeError::UnknownParameter("wet".into())));

    let node = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    assert_eq!(node.set("delayTime", 1.0), Err(BridgeError::UnknownParameter("delayTime".into())));
}

#[test]
fn missing_target_leaves_parameter_inert() {
    let (ctx, mut r) = context(48_000.0, 1);
    let node = EffectNode::new(&ctx, &CRUSHER_WITH_DRIVE, NodeOptions::new().param("bits", 1.0)).unwrap();
    node.to_destination();
    assert_eq!(node.ready().wait(), Ok(()));

    assert!(matches!(node.cell("drive"), Some(ParamCell::Inert(v)) if v == 0.5));
    assert_eq!(node.set("drive", 0.9), Ok(()));
    assert_eq!(node.get("drive"), Some(0.5));

    // the rest of the node still works
    assert!(node.cell("bits").is_some_and(|c| c.is_bound()));
    let out = quantum(&mut r, |_| 0.6);
    assert!(out[0].iter().all(|&s| s == 1.0));
}

#[test]
fn shadow_value_carries_into_first_block() {
    let (ctx, mut r) = context(48_000.0, 2);
    let node = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0)).unwrap();
    node.to_destination();
    node.ready().wait().unwrap();

    let cell = node.cell("bits").unwrap();
    assert!(cell.is_bound());
    assert_eq!(cell.value(), 1.0);

    // no ramp from the processor default: the very first sample is crushed
    let out = quantum(&mut r, |_| 0.6);
    for c in 0..2 {
        assert!(out[c].iter().all(|&s| s == 1.0));
    }
}

#[test]
fn writes_after_ready_reach_the_processor() {
    let (ctx, mut r) = context(48_000.0, 1);
    let node = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0)).unwrap();
    node.to_destination();
    node.ready().wait().unwrap();
    silence(&mut r);

    node.set("bits", 16.0).unwrap();
    let out = quantum(&mut r, |_| 0.3);
    assert!(out[0].iter().all(|&s| (s - 0.3).abs() <= 2f32.powi(-15)));

    // 50 ms at 48 kHz is 2400 frames; k-rate bits step once per block
    node.set_bits(1.0);
    assert_eq!(node.bits(), 1.0);
    let first = quantum(&mut r, |_| 0.3);
    assert!((first[0][0] - 0.3).abs() <= 2f32.powi(-15), "ramp starts where it was");
    for _ in 0..20 {
        silence(&mut r);
    }
    let settled = quantum(&mut r, |_| 0.3);
    assert!(settled[0].iter().all(|&s| s == 0.0));
}

#[test]
fn wet_zero_is_exact_dry_and_half_is_equal_power() {
    let (ctx, mut r) = context(48_000.0, 1);
    let node = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0).wet(0.0)).unwrap();
    node.to_destination();
    node.ready().wait().unwrap();

    let out = quantum(&mut r, |i| i as f32 / 256.0);
    for i in 0..fxlet_engine::BLOCK_SIZE {
        assert_eq!(out[0][i], i as f32 / 256.0);
    }

    node.set("wet", 0.5).unwrap();
    let out = quantum(&mut r, |_| 0.6);
    let g = std::f32::consts::FRAC_1_SQRT_2;
    assert!((out[0][0] - (0.6 * g + 1.0 * g)).abs() < 1e-5);
}

#[test]
fn wet_only_routing_skips_the_crossfade() {
    let (ctx, mut r) = context(48_000.0, 1);
    let node = EffectNode::new(&ctx, &DRY_LESS_CRUSHER, NodeOptions::new().param("bits", 1.0)).unwrap();
    node.to_destination();
    node.ready().wait().unwrap();
    assert!(node.cell("wet").is_none());

    let out = quantum(&mut r, |_| 0.4);
    assert!(out[0].iter().all(|&s| s == 0.0));
}

#[test]
fn dispose_is_idempotent_and_keeps_the_scope() {
    let (ctx, mut r) = context(48_000.0, 1);
    let node = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0)).unwrap();
    node.to_destination();
    node.ready().wait().unwrap();
    silence(&mut r);
    assert_eq!(r.live_units().count(), 1);

    node.dispose();
    node.dispose();
    assert!(node.is_disposed());
    assert_eq!(node.set("bits", 3.0), Ok(()));
    assert!(ctx.path().is_empty());

    // the unit reports "do not keep alive" and leaves the renderer
    let out = quantum(&mut r, |_| 0.6);
    assert!(out[0].iter().all(|&s| s == 0.6));
    assert_eq!(r.live_units().count(), 0);
    ctx.collect_garbage();
    assert_eq!(ctx.node_count(), 0);

    let again = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    assert_eq!(again.ready().wait(), Ok(()));
    assert_eq!(ctx.module_installs(), 1);
}

#[test]
fn dispose_racing_initialisation_releases_everything() {
    let (ctx, _r) = context(48_000.0, 1);
    let node = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    node.dispose();
    match node.ready().wait_timeout(Duration::from_secs(5)) {
        Some(Ok(())) | Some(Err(BridgeError::Disposed)) => {}
        other => panic!("unexpected readiness {other:?}"),
    }
    ctx.collect_garbage();
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn dropping_a_node_disposes_it() {
    let (ctx, mut r) = context(48_000.0, 1);
    {
        let node = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
        node.to_destination();
        node.ready().wait().unwrap();
        silence(&mut r);
    }
    silence(&mut r);
    assert_eq!(r.live_units().count(), 0);
}

#[test]
fn connect_orders_the_serial_path() {
    let (ctx, mut r) = context(48_000.0, 1);
    let crush = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0)).unwrap();
    let coarse = EffectNode::new(&ctx, &DRY_LESS_CRUSHER, NodeOptions::new().param("bits", 16.0)).unwrap();
    coarse.to_destination();
    crush.connect(&coarse);
    assert_eq!(ctx.path(), vec![crush.id(), coarse.id()]);
    crush.ready().wait().unwrap();
    coarse.ready().wait().unwrap();

    silence(&mut r);
    assert_eq!(r.live_units().collect::<Vec<_>>(), vec![crush.id(), coarse.id()]);

    crush.disconnect();
    let out = quantum(&mut r, |_| 0.6);
    assert_eq!(r.live_units().collect::<Vec<_>>(), vec![coarse.id()]);
    assert!(out[0].iter().all(|&s| (s - 0.6).abs() <= 2f32.powi(-15)));
}

#[test]
fn reconnecting_before_the_next_quantum_keeps_the_effect() {
    let (ctx, mut r) = context(48_000.0, 1);
    let crush = BitCrusher::new(&ctx, NodeOptions::new().param("bits", 1.0)).unwrap();
    crush.to_destination();
    crush.ready().wait().unwrap();
    silence(&mut r);
    assert_eq!(r.live_units().collect::<Vec<_>>(), vec![crush.id()]);

    crush.disconnect();
    crush.to_destination();
    for _ in 0..4 {
        let out = quantum(&mut r, |_| 0.6);
        assert_eq!(r.live_units().collect::<Vec<_>>(), vec![crush.id()]);
        assert!(out[0].iter().all(|&s| (s - 1.0).abs() < 1e-6), "{:?}", &out[0][..4]);
    }

    // same again, through connect
    let coarse = EffectNode::new(&ctx, &DRY_LESS_CRUSHER, NodeOptions::new().param("bits", 16.0)).unwrap();
    coarse.ready().wait().unwrap();
    crush.disconnect();
    crush.connect(&coarse);
    silence(&mut r);
    assert_eq!(r.live_units().collect::<Vec<_>>(), vec![crush.id(), coarse.id()]);
}

#[test]
fn long_burst_of_reorders_settles_on_the_last() {
    let (ctx, mut r) = context(48_000.0, 1);
    let a = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    let b = BitCrusher::new(&ctx, NodeOptions::new()).unwrap();
    a.to_destination();
    b.to_destination();
    a.ready().wait().unwrap();
    b.ready().wait().unwrap();
    silence(&mut r);

    for i in 0..2_049 {
        if i % 2 == 0 { b.connect(&a) } else { a.connect(&b) };
    }
    silence(&mut r);
    assert_eq!(ctx.path(), vec![b.id(), a.id()]);
    assert_eq!(r.live_units().collect::<Vec<_>>(), ctx.path());
}

#[test]
fn message_params_are_not_automated() {
    let spec = fxlet_engine::effects::NOISE_GENERATOR.param("amplitude").copied().unwrap();
    assert_eq!(spec.binding, Binding::Message);
}
