//! Token embedding and bidirectional GRU sequence encoder.
//!
//! Sequences arrive padded to a common width. The encoder is masked by the
//! true lengths: at padded positions the recurrent state is carried through
//! unchanged and the emitted state is zero, so the forward summary is the
//! state at the last real token and the backward pass effectively starts there.

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::ops::sigmoid;
use candle_nn::{Dropout, Embedding, Linear, Module, VarBuilder, embedding, linear};

/// Shared word-embedding table with training-only feature dropout.
pub struct TokenEmbedder {
    table: Embedding,
    dropout: Dropout,
}

impl TokenEmbedder {
    pub fn new(num_words: usize, dim_word: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            table: embedding(num_words, dim_word, vb)?,
            dropout: Dropout::new(dropout),
        })
    }

    /// `[b, L]` ids to `[b, L, dim_word]` embeddings.
    pub fn forward(&self, ids: &Tensor, train: bool) -> Result<Tensor> {
        let emb = self.table.forward(ids)?;
        self.dropout.forward(&emb, train)
    }
}

/// Single GRU cell (reset, update and candidate gates).
struct GruCell {
    input: Linear,
    hidden: Linear,
    width: usize,
}

impl GruCell {
    fn new(in_dim: usize, width: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            input: linear(in_dim, 3 * width, vb.pp("ih"))?,
            hidden: linear(width, 3 * width, vb.pp("hh"))?,
            width,
        })
    }

    fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let w = self.width;
        let gi = self.input.forward(x)?;
        let gh = self.hidden.forward(h)?;

        let r = sigmoid(&gi.narrow(1, 0, w)?.add(&gh.narrow(1, 0, w)?)?)?;
        let z = sigmoid(&gi.narrow(1, w, w)?.add(&gh.narrow(1, w, w)?)?)?;
        let n = gi
            .narrow(1, 2 * w, w)?
            .add(&r.mul(&gh.narrow(1, 2 * w, w)?)?)?
            .tanh()?;

        // h' = (1 - z) * n + z * h
        n.add(&z.mul(&h.sub(&n)?)?)
    }
}

/// Output of [`SequenceEncoder::forward`].
pub struct Encoded {
    /// Per-token states `[b, L, H]`; zero beyond each true length.
    pub states: Tensor,
    /// Sequence summaries `[b, H]`: final forward state ++ final backward state.
    pub pooled: Tensor,
}

/// Bidirectional GRU over padded sequences.
pub struct SequenceEncoder {
    forward: GruCell,
    backward: GruCell,
    half: usize,
}

impl SequenceEncoder {
    /// `dim_hidden` must be even; each direction has width `dim_hidden / 2`.
    pub fn new(dim_word: usize, dim_hidden: usize, vb: VarBuilder) -> Result<Self> {
        let half = dim_hidden / 2;
        Ok(Self {
            forward: GruCell::new(dim_word, half, vb.pp("fwd"))?,
            backward: GruCell::new(dim_word, half, vb.pp("bwd"))?,
            half,
        })
    }

    /// Encode `[b, L, dim_word]` embeddings with the given true lengths.
    pub fn forward(&self, emb: &Tensor, lengths: &[usize]) -> Result<Encoded> {
        let (b, l, _) = emb.dims3()?;
        let device = emb.device();
        let masks = step_masks(lengths, l, device)?;

        let mut h = Tensor::zeros((b, self.half), DType::F32, device)?;
        let mut fwd = Vec::with_capacity(l);
        for t in 0..l {
            let x = emb.narrow(1, t, 1)?.squeeze(1)?;
            h = blend(&self.forward.step(&x, &h)?, &h, &masks[t])?;
            fwd.push(h.broadcast_mul(&masks[t].0)?);
        }
        let h_fwd = h;

        let mut h = Tensor::zeros((b, self.half), DType::F32, device)?;
        let mut bwd = Vec::with_capacity(l);
        for t in (0..l).rev() {
            let x = emb.narrow(1, t, 1)?.squeeze(1)?;
            h = blend(&self.backward.step(&x, &h)?, &h, &masks[t])?;
            bwd.push(h.broadcast_mul(&masks[t].0)?);
        }
        bwd.reverse();
        let h_bwd = h;

        let states = Tensor::cat(&[Tensor::stack(&fwd, 1)?, Tensor::stack(&bwd, 1)?], D::Minus1)?;
        let pooled = Tensor::cat(&[&h_fwd, &h_bwd], D::Minus1)?;
        Ok(Encoded { states, pooled })
    }
}

/// Per position: (`[b, 1]` 1.0 where `t < len`, its complement).
fn step_masks(lengths: &[usize], width: usize, device: &Device) -> Result<Vec<(Tensor, Tensor)>> {
    let b = lengths.len();
    (0..width)
        .map(|t| {
            let keep: Vec<f32> = lengths
                .iter()
                .map(|&len| if t < len { 1.0 } else { 0.0 })
                .collect();
            let keep = Tensor::from_vec(keep, (b, 1), device)?;
            let hold = keep.affine(-1.0, 1.0)?;
            Ok((keep, hold))
        })
        .collect()
}

fn blend(next: &Tensor, prev: &Tensor, mask: &(Tensor, Tensor)) -> Result<Tensor> {
    next.broadcast_mul(&mask.0)?
        .add(&prev.broadcast_mul(&mask.1)?)
}
