// src/process/fill.rs
//! Forward-fill ("last seen non-null wins") over a serial-ordered column.
//!
//! `out[i] = values[j]` where `j` is the greatest index `<= i` with
//! `values[j].is_some()`, or `None` if there is no such index.
//!
//! [`forward_fill_sharded`] computes the same thing in parallel: each shard
//! is scanned locally, the carry entering each shard is derived from the
//! shard boundary values in one sequential pass, and the carry is then
//! applied to each shard's unfilled prefix.

use rayon::prelude::*;

pub fn forward_fill<T: Clone>(values: &[Option<T>]) -> Vec<Option<T>> {
    let mut last: Option<T> = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = v.clone();
            }
            last.clone()
        })
        .collect()
}

/// Two-phase parallel forward-fill. `shard_len == 0` falls back to the
/// sequential scan.
pub fn forward_fill_sharded<T>(values: &[Option<T>], shard_len: usize) -> Vec<Option<T>>
where
    T: Clone + Send + Sync,
{
    if shard_len == 0 || values.len() <= shard_len {
        return forward_fill(values);
    }

    // 1) local scan per shard; remember the last value each shard saw
    let mut shards: Vec<(Vec<Option<T>>, Option<T>)> = values
        .par_chunks(shard_len)
        .map(|chunk| {
            let filled = forward_fill(chunk);
            let tail = filled.last().cloned().flatten();
            (filled, tail)
        })
        .collect();

    // 2) carry entering shard k = last non-null tail among shards 0..k
    let mut carries: Vec<Option<T>> = Vec::with_capacity(shards.len());
    let mut carry: Option<T> = None;
    for (_, tail) in &shards {
        carries.push(carry.clone());
        if tail.is_some() {
            carry = tail.clone();
        }
    }

    // 3) patch the leading run of `None`s in every shard with its carry
    shards
        .par_iter_mut()
        .zip(carries.into_par_iter())
        .for_each(|((filled, _), carry)| {
            if carry.is_none() {
                return;
            }
            for slot in filled.iter_mut() {
                if slot.is_some() {
                    break;
                }
                *slot = carry.clone();
            }
        });

    shards.into_iter().flat_map(|(filled, _)| filled).collect()
}
