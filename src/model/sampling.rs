//! Next-token selection over a raw logits row.

use std::collections::HashSet;

use rand::Rng;

use crate::pipeline::GenerationParameters;

/// Dampens logits of tokens already present in `context`.
pub fn apply_repetition_penalty(logits: &mut [f32], context: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = context.iter().copied().collect();
    for id in seen {
        if let Some(logit) = logits.get_mut(id as usize) {
            if *logit >= 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

pub fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (idx, &value)| {
            if value > best.1 { (idx, value) } else { best }
        })
        .0 as u32
}

/// Greedy when `do_sample` is off, otherwise temperature + top-k + top-p.
pub fn sample_token<R: Rng>(
    logits: &[f32],
    params: &GenerationParameters,
    rng: &mut R,
) -> u32 {
    if !params.do_sample || logits.is_empty() {
        return argmax(logits);
    }

    let temperature = params.temperature as f32;
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut candidates: Vec<(u32, f64)> = logits
        .iter()
        .enumerate()
        .map(|(idx, &logit)| (idx as u32, (((logit - max) / temperature) as f64).exp()))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(params.top_k.max(1) as usize);

    let total: f64 = candidates.iter().map(|(_, p)| p).sum();
    let mut cumulative = 0.0;
    let mut keep = 0;
    for (_, p) in &candidates {
        cumulative += p / total;
        keep += 1;
        if cumulative >= params.top_p {
            break;
        }
    }
    candidates.truncate(keep.max(1));

    let mass: f64 = candidates.iter().map(|(_, p)| p).sum();
    let mut draw = rng.gen_range(0.0..1.0) * mass;
    for (id, p) in &candidates {
        if draw < *p {
            return *id;
        }
        draw -= p;
    }
    candidates[candidates.len() - 1].0
}
