//! Differentiable score transfer along edges and the per-hop clamp.

use candle_core::{Result, Tensor};

/// Move score mass along candidate edges.
///
/// For every edge `(s, o)` with transfer probability `p`, adds `e[s] * p` into
/// the output at `o`. Contributions to the same object sum; entities that
/// receive nothing end at 0. `e` is `[num_entities]`, the other three are
/// `[num_edges]` with `u32` ids.
pub fn follow(e: &Tensor, subjects: &Tensor, objects: &Tensor, p: &Tensor) -> Result<Tensor> {
    let moved = e.index_select(subjects, 0)?.mul(p)?;
    e.zeros_like()?.index_add(objects, &moved, 0)
}

/// Push every score above 1 down to exactly 1, leaving the rest untouched.
///
/// Each over-threshold entry is divided by its own value. The divisor is
/// detached so gradients flow through the numerator only.
pub fn renormalize(e: &Tensor) -> Result<Tensor> {
    let divisor = e.maximum(&e.ones_like()?)?.detach();
    e.div(&divisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    fn vec1(t: &Tensor) -> Vec<f32> {
        t.to_vec1::<f32>().unwrap()
    }

    fn ids(v: &[u32]) -> Tensor {
        Tensor::new(v, &Device::Cpu).unwrap()
    }

    #[test]
    fn single_edge_moves_score_times_probability() {
        let e = Tensor::new(&[0.8f32, 0.0, 0.0], &Device::Cpu).unwrap();
        let p = Tensor::new(&[0.25f32], &Device::Cpu).unwrap();
        let out = follow(&e, &ids(&[0]), &ids(&[2]), &p).unwrap();
        assert_eq!(vec1(&out), vec![0.0, 0.0, 0.2]);
    }

    #[test]
    fn incoming_contributions_sum() {
        let e = Tensor::new(&[1.0f32, 0.5, 0.0], &Device::Cpu).unwrap();
        let p = Tensor::new(&[0.5f32, 1.0], &Device::Cpu).unwrap();
        let out = follow(&e, &ids(&[0, 1]), &ids(&[2, 2]), &p).unwrap();
        assert_eq!(vec1(&out), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn dead_end_contributes_nothing() {
        // Entity 1 carries score but has no candidate edge.
        let e = Tensor::new(&[0.3f32, 1.0, 0.0], &Device::Cpu).unwrap();
        let p = Tensor::new(&[1.0f32], &Device::Cpu).unwrap();
        let out = follow(&e, &ids(&[0]), &ids(&[2]), &p).unwrap();
        let v = vec1(&out);
        assert_eq!(v[0], 0.0);
        assert_eq!(v[1], 0.0);
        assert!((v[2] - 0.3).abs() < 1e-7);
    }

    #[test]
    fn renormalize_clamps_only_above_one() {
        let e = Tensor::new(&[0.0f32, 0.4, 1.0, 1.7, 3.0], &Device::Cpu).unwrap();
        let out = renormalize(&e).unwrap();
        assert_eq!(vec1(&out), vec![0.0, 0.4, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn renormalize_is_idempotent() {
        let e = Tensor::new(&[0.2f32, 1.3, 0.99, 7.5, 1.0], &Device::Cpu).unwrap();
        let once = renormalize(&e).unwrap();
        let twice = renormalize(&once).unwrap();
        assert_eq!(vec1(&once), vec1(&twice));
    }

    #[test]
    fn renormalize_gradient_skips_the_divisor() {
        // d/dx (x / stop_grad(x)) = 1 / x for x > 1, and 1 for x <= 1.
        let x = Var::new(&[0.5f32, 2.0, 4.0], &Device::Cpu).unwrap();
        let y = renormalize(x.as_tensor()).unwrap().sum_all().unwrap();
        let grads = y.backward().unwrap();
        let g = vec1(grads.get(x.as_tensor()).unwrap());
        assert!((g[0] - 1.0).abs() < 1e-6);
        assert!((g[1] - 0.5).abs() < 1e-6);
        assert!((g[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn follow_is_differentiable_in_probabilities() {
        let e = Tensor::new(&[0.6f32, 0.0], &Device::Cpu).unwrap();
        let p = Var::new(&[0.5f32], &Device::Cpu).unwrap();
        let out = follow(&e, &ids(&[0]), &ids(&[1]), p.as_tensor())
            .unwrap()
            .sum_all()
            .unwrap();
        let grads = out.backward().unwrap();
        let g = vec1(grads.get(p.as_tensor()).unwrap());
        assert!((g[0] - 0.6).abs() < 1e-6);
    }
}
