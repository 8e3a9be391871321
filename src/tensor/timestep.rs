//! Sinusoidal timestep embedding, the input half of each of the DiT
//! decoder's two time-embedding heads.

use candle_core::{DType, Device, Result, Tensor};

/// Builds sinusoidal embeddings `[B, dim]` for a batch of scalar
/// timesteps, following the standard diffusion-model convention:
/// `dim/2` log-spaced frequencies, concatenated `[sin; cos]` halves.
/// `max_period` controls the lowest frequency (10000.0 is standard).
pub fn sinusoidal_embedding(t: &Tensor, dim: usize, max_period: f64, device: &Device) -> Result<Tensor> {
    let half = dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-((max_period.ln()) * i as f64 / half as f64)).exp() as f32)
        .collect();
    let freqs = Tensor::from_vec(freqs, half, device)?;
    let t = t.to_dtype(DType::F32)?.reshape((t.elem_count(), 1))?;
    let args = t.broadcast_mul(&freqs.unsqueeze(0)?)?;
    let mut embedding = Tensor::cat(&[&args.cos()?, &args.sin()?], 1)?;
    if dim % 2 == 1 {
        let batch = embedding.dim(0)?;
        let pad = Tensor::zeros((batch, 1), DType::F32, device)?;
        embedding = Tensor::cat(&[&embedding, &pad], 1)?;
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_shape_matches_requested_dim() {
        let dev = Device::Cpu;
        let t = Tensor::from_vec(vec![0f32, 500.0], 2, &dev).unwrap();
        let emb = sinusoidal_embedding(&t, 16, 10000.0, &dev).unwrap();
        assert_eq!(emb.dims(), &[2, 16]);
    }

    #[test]
    fn odd_dim_is_zero_padded() {
        let dev = Device::Cpu;
        let t = Tensor::from_vec(vec![1f32], 1, &dev).unwrap();
        let emb = sinusoidal_embedding(&t, 7, 10000.0, &dev).unwrap();
        assert_eq!(emb.dims(), &[1, 7]);
        let last = emb.narrow(1, 6, 1).unwrap().to_vec2::<f32>().unwrap()[0][0];
        assert_eq!(last, 0.0);
    }

    #[test]
    fn timestep_zero_cos_half_is_all_ones() {
        let dev = Device::Cpu;
        let t = Tensor::from_vec(vec![0f32], 1, &dev).unwrap();
        let emb = sinusoidal_embedding(&t, 8, 10000.0, &dev).unwrap();
        let values = emb.to_vec2::<f32>().unwrap()[0].clone();
        for v in &values[0..4] {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
