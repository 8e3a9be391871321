//! Diffusion timestep schedule construction.

/// Number of canonical admissible timesteps custom schedules snap to.
const ADMISSIBLE_COUNT: usize = 20;
const ADMISSIBLE_MIN: f32 = 0.125;
const ADMISSIBLE_MAX: f32 = 1.0;

/// Maximum schedule length the pipeline will ever construct or accept.
pub const MAX_SCHEDULE_LEN: usize = 20;

/// The fixed table of canonical timesteps explicit schedules are
/// snapped to: 20 values evenly spaced across `[0.125, 1.0]`.
pub fn admissible_timesteps() -> Vec<f32> {
    (0..ADMISSIBLE_COUNT)
        .map(|i| ADMISSIBLE_MIN + i as f32 * (ADMISSIBLE_MAX - ADMISSIBLE_MIN) / (ADMISSIBLE_COUNT - 1) as f32)
        .collect()
}

fn snap_to_admissible(value: f32) -> f32 {
    admissible_timesteps()
        .into_iter()
        .min_by(|a, b| {
            (a - value)
                .abs()
                .partial_cmp(&(b - value).abs())
                .expect("timestep values are never NaN")
        })
        .expect("admissible table is non-empty")
}

/// Generates `n` linearly spaced timesteps from 1.0 down to just above
/// 0.0, applying the flow-matching shift remap when `shift != 1.0`.
fn linear_shifted_schedule(n: usize, shift: f32) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = 1.0 - i as f32 / n as f32;
            if (shift - 1.0).abs() < f32::EPSILON {
                t
            } else {
                shift * t / (1.0 + (shift - 1.0) * t)
            }
        })
        .collect()
}

fn nearest_of(shift: f32, candidates: &[f32]) -> f32 {
    *candidates
        .iter()
        .min_by(|a, b| (*a - shift).abs().partial_cmp(&(*b - shift).abs()).unwrap())
        .unwrap()
}

/// Drops a trailing run of zeros from `timesteps` (an explicit
/// schedule ending in padding), then caps the remainder at
/// `MAX_SCHEDULE_LEN` entries.
fn trim_explicit(timesteps: &[f32]) -> Vec<f32> {
    let mut end = timesteps.len();
    while end > 0 && timesteps[end - 1] == 0.0 {
        end -= 1;
    }
    timesteps[..end].iter().copied().take(MAX_SCHEDULE_LEN).collect()
}

/// Builds the diffusion schedule under a three-way contract: explicit
/// `timesteps` (snapped to the admissible table),
/// else a generated `inference_steps`-length schedule, else the
/// precomputed 8-step table for `shift` snapped to `{1, 2, 3}`.
pub fn schedule(shift: f32, inference_steps: u32, timesteps: Option<&[f32]>) -> Vec<f32> {
    if let Some(explicit) = timesteps {
        return trim_explicit(explicit).into_iter().map(snap_to_admissible).collect();
    }
    if inference_steps > 0 {
        return linear_shifted_schedule(inference_steps as usize, shift);
    }
    let snapped_shift = nearest_of(shift, &[1.0, 2.0, 3.0]);
    linear_shifted_schedule(8, snapped_shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_eight_step_schedule_is_evenly_spaced_at_shift_one() {
        // S3: inference_steps=8, shift=1.0, no custom timesteps.
        let sched = schedule(1.0, 8, None);
        let expected = [1.0, 0.875, 0.75, 0.625, 0.5, 0.375, 0.25, 0.125];
        assert_eq!(sched.len(), 8);
        for (got, want) in sched.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
        }
    }

    #[test]
    fn schedule_is_strictly_decreasing_and_starts_at_one() {
        let sched = schedule(3.0, 12, None);
        assert!((sched[0] - 1.0).abs() < 1e-6);
        for w in sched.windows(2) {
            assert!(w[0] > w[1], "{:?} not strictly decreasing", sched);
        }
        assert!(sched.iter().all(|&t| t > 0.0 && t <= 1.0));
    }

    #[test]
    fn explicit_timesteps_are_trimmed_and_capped() {
        // S4: explicit timesteps with shift=2.0; length preserved,
        // each value snapped into [0.125, 1.0].
        let sched = schedule(2.0, 0, Some(&[1.0, 0.9, 0.5, 0.25]));
        assert_eq!(sched.len(), 4);
        assert!(sched.iter().all(|&t| (0.125..=1.0).contains(&t)));
    }

    #[test]
    fn trailing_zeros_are_dropped() {
        let sched = schedule(1.0, 0, Some(&[1.0, 0.5, 0.0, 0.0]));
        assert_eq!(sched.len(), 2);
    }

    #[test]
    fn explicit_schedule_is_capped_at_twenty() {
        let long: Vec<f32> = (0..30).map(|i| 1.0 - i as f32 * 0.01).collect();
        let sched = schedule(1.0, 0, Some(&long));
        assert_eq!(sched.len(), MAX_SCHEDULE_LEN);
    }

    #[test]
    fn zero_inference_steps_falls_back_to_snapped_shift_table() {
        let sched = schedule(2.6, 0, None);
        assert_eq!(sched.len(), 8);
        // 2.6 snaps to 3.0; the table should equal the shift=3.0 generated schedule.
        let expected = linear_shifted_schedule(8, 3.0);
        for (got, want) in sched.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn schedule_idempotence_feeding_output_back_as_timesteps() {
        // Component law: feeding a previously returned schedule back
        // as `timesteps` yields the same sequence (its values are
        // already on the admissible grid after the first snap).
        let first = schedule(2.0, 0, Some(&[1.0, 0.6, 0.3, 0.125]));
        let second = schedule(2.0, 0, Some(&first));
        assert_eq!(first, second);
    }
}
