use crate::param::ParamDescriptor;
use crate::processor::{ParamValues, ProcessorOptions, SampleProcessor};
use crate::registry::ProcessorClass;

pub const PROCESSOR_NAME: &str = "bit-crusher";

pub const BITS: usize = 0;

pub static PARAMS: [ParamDescriptor; 1] = [ParamDescriptor::k_rate("bits", 8.0, 1.0, 16.0)];

pub static CLASS: ProcessorClass = ProcessorClass {
    name: "BitCrusher",
    extends: "SampleProcessor",
    inputs: 1,
    parameters: &PARAMS,
    construct,
};

fn construct(_opts: &ProcessorOptions) -> Box<dyn SampleProcessor> {
    Box::new(BitCrusher)
}

/// Round `x` to the nearest multiple of `2^(1 - bits)`.
#[inline]
pub fn quantize(x: f32, bits: f32) -> f32 {
    let step = (1.0 - bits.clamp(1.0, 16.0)).exp2();
    step * (x / step + 0.5).floor()
}

/// Stateless bit-depth reducer.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitCrusher;

impl SampleProcessor for BitCrusher {
    #[inline]
    fn generate(&mut self, input: f32, _channel: usize, params: &ParamValues) -> f32 {
        quantize(input, params[BITS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> impl Iterator<Item = f32> {
        (0..=4000).map(|i| -1.0 + i as f32 * 0.0005)
    }

    #[test]
    fn quantize_is_idempotent() {
        for bits in 1..=16 {
            let bits = bits as f32;
            for x in sweep() {
                let once = quantize(x, bits);
                assert_eq!(quantize(once, bits), once, "bits={bits} x={x}");
            }
        }
    }

    #[test]
    fn sixteen_bit_error_is_within_one_step() {
        let step = 2f32.powi(-15);
        for x in sweep() {
            assert!((quantize(x, 16.0) - x).abs() <= step, "x={x}");
        }
    }

    #[test]
    fn one_bit_snaps_to_coarse_levels() {
        assert_eq!(quantize(0.4, 1.0), 0.0);
        assert_eq!(quantize(0.6, 1.0), 1.0);
        assert_eq!(quantize(-0.6, 1.0), -1.0);
    }

    #[test]
    fn bits_outside_range_are_clamped() {
        assert_eq!(quantize(0.3, 0.0), quantize(0.3, 1.0));
        assert_eq!(quantize(0.3, 40.0), quantize(0.3, 16.0));
    }

    #[test]
    fn four_bit_sine_block() {
        let sr = 48_000.0f32;
        let params = ParamValues::with_values(&PARAMS, &[4.0]);
        let mut crusher = BitCrusher;
        for i in 0..crate::BLOCK_SIZE {
            let x = (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / sr).sin();
            let expected = (x / 0.125 + 0.5).floor() * 0.125;
            assert_eq!(crusher.generate(x, 0, &params), expected);
        }
    }
}
