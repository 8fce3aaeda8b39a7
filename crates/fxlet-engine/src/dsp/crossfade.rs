use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use crate::param::{AutomationParam, ParamCursor, ParamDescriptor};
use crate::processor::AudioBlock;
use crate::BLOCK_SIZE;

/// Mix position: 0 is all dry, 1 is all wet.
pub const WET: ParamDescriptor = ParamDescriptor::a_rate("wet", 1.0, 0.0, 1.0);

/// Equal-power gains `(dry, wet)` for a fade position. The end points are
/// exact so a fully wet or fully dry mix is bit-identical to its source.
#[inline]
pub fn gains(fade: f32) -> (f32, f32) {
    if fade <= 0.0 {
        (1.0, 0.0)
    } else if fade >= 1.0 {
        (0.0, 1.0)
    } else {
        let a = fade * FRAC_PI_2;
        (a.cos(), a.sin())
    }
}

/// Wet/dry crossfade driven by an automatable fade position.
pub struct Crossfade {
    fade: ParamCursor,
}

impl Crossfade {
    pub fn new(fade: Arc<AutomationParam>) -> Self {
        Self { fade: ParamCursor::new(fade) }
    }

    /// `out = dry * cos(fade·π/2) + wet * sin(fade·π/2)`, per sample.
    pub fn process(&mut self, dry: &AudioBlock, wet: &AudioBlock, out: &mut AudioBlock) {
        let curve = self.fade.next_block();
        let constant = (curve.len() == 1).then(|| gains(curve[0]));
        for c in 0..out.channels() {
            let d = dry.channel(c.min(dry.channels().saturating_sub(1)));
            let w = wet.channel(c);
            let o = out.channel_mut(c);
            for i in 0..BLOCK_SIZE {
                let (gd, gw) = constant.unwrap_or_else(|| gains(curve[i]));
                o[i] = d[i] * gd + w[i] * gw;
            }
        }
    }
}
