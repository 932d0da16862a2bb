//! Fast-marching inpainting (Telea 2004).
//!
//! Unknown pixels are filled in order of their distance from the known
//! region. Each filled pixel is a weighted average of known pixels within
//! `radius`, weighted by direction along the marching front, geometric
//! distance, and level-set distance.

use parallax_core::frame::CHANNELS;
use parallax_core::Frame;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const FAR: f32 = 1.0e6;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Known,
    Band,
    Inside,
}

#[derive(Clone, Copy)]
struct Node {
    t: f32,
    idx: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // Min-heap on arrival time, ties broken by index for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Fill every pixel of `frame` where `mask` is true.
///
/// `mask` is row-major with one entry per pixel. Returns the number of
/// pixels filled. A mask with no known pixel at all is left untouched.
pub fn inpaint_telea(frame: &mut Frame, mask: &[bool], radius: u32) -> usize {
    let w = frame.width as usize;
    let h = frame.height as usize;
    debug_assert_eq!(mask.len(), w * h);
    if !mask.iter().any(|&m| m) || mask.iter().all(|&m| m) {
        return 0;
    }

    let mut state: Vec<State> = mask
        .iter()
        .map(|&m| if m { State::Inside } else { State::Known })
        .collect();
    let mut t = vec![0.0f32; w * h];
    let mut heap = BinaryHeap::new();

    for idx in 0..w * h {
        if state[idx] == State::Inside {
            t[idx] = FAR;
            continue;
        }
        let (x, y) = (idx % w, idx / w);
        if neighbors(x, y, w, h).any(|n| mask[n]) {
            state[idx] = State::Band;
            heap.push(Node { t: 0.0, idx });
        }
    }

    let radius = radius.max(1) as i64;
    let mut filled = 0;
    while let Some(Node { idx, .. }) = heap.pop() {
        if state[idx] == State::Known {
            continue;
        }
        state[idx] = State::Known;
        let (x, y) = (idx % w, idx / w);
        for n in neighbors(x, y, w, h) {
            if state[n] != State::Inside {
                continue;
            }
            let (nx, ny) = (n % w, n / w);
            t[n] = arrival_time(nx, ny, w, h, &t, &state);
            fill_pixel(frame, nx, ny, radius, &t, &state);
            state[n] = State::Band;
            filled += 1;
            heap.push(Node { t: t[n], idx: n });
        }
    }
    filled
}

fn neighbors(x: usize, y: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let idx = y * w + x;
    [
        (x > 0).then(|| idx - 1),
        (x + 1 < w).then(|| idx + 1),
        (y > 0).then(|| idx - w),
        (y + 1 < h).then(|| idx + w),
    ]
    .into_iter()
    .flatten()
}

fn settled_t(x: i64, y: i64, w: usize, h: usize, t: &[f32], state: &[State]) -> f32 {
    if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
        return FAR;
    }
    let i = y as usize * w + x as usize;
    if state[i] == State::Inside {
        FAR
    } else {
        t[i]
    }
}

/// Solve |∇T| = 1 from one horizontal and one vertical neighbor.
fn solve_eikonal(a: f32, b: f32) -> f32 {
    match (a >= FAR, b >= FAR) {
        (true, true) => FAR,
        (true, false) => b + 1.0,
        (false, true) => a + 1.0,
        (false, false) => {
            let d = 2.0 - (a - b) * (a - b);
            if d > 0.0 {
                let s = (a + b + d.sqrt()) * 0.5;
                if s >= a && s >= b {
                    return s;
                }
            }
            a.min(b) + 1.0
        }
    }
}

fn arrival_time(x: usize, y: usize, w: usize, h: usize, t: &[f32], state: &[State]) -> f32 {
    let (x, y) = (x as i64, y as i64);
    let l = settled_t(x - 1, y, w, h, t, state);
    let r = settled_t(x + 1, y, w, h, t, state);
    let u = settled_t(x, y - 1, w, h, t, state);
    let d = settled_t(x, y + 1, w, h, t, state);
    solve_eikonal(l, u)
        .min(solve_eikonal(r, u))
        .min(solve_eikonal(l, d))
        .min(solve_eikonal(r, d))
}

fn gradient_t(x: usize, y: usize, w: usize, h: usize, t: &[f32], state: &[State]) -> (f32, f32) {
    let (x, y) = (x as i64, y as i64);
    let c = settled_t(x, y, w, h, t, state);
    let axis = |prev: f32, next: f32| match (prev < FAR, next < FAR) {
        (true, true) => (next - prev) * 0.5,
        (false, true) => next - c,
        (true, false) => c - prev,
        (false, false) => 0.0,
    };
    let gx = axis(
        settled_t(x - 1, y, w, h, t, state),
        settled_t(x + 1, y, w, h, t, state),
    );
    let gy = axis(
        settled_t(x, y - 1, w, h, t, state),
        settled_t(x, y + 1, w, h, t, state),
    );
    (gx, gy)
}

fn fill_pixel(frame: &mut Frame, x: usize, y: usize, radius: i64, t: &[f32], state: &[State]) {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let idx = y * w + x;
    let (gx, gy) = gradient_t(x, y, w, h, t, state);
    let mut acc = [0.0f32; CHANNELS];
    let mut total = 0.0f32;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (kx, ky) = (x as i64 + dx, y as i64 + dy);
            if kx < 0 || ky < 0 || kx >= w as i64 || ky >= h as i64 {
                continue;
            }
            let len2 = (dx * dx + dy * dy) as f32;
            if len2 == 0.0 || len2 > (radius * radius) as f32 {
                continue;
            }
            let k = ky as usize * w + kx as usize;
            if state[k] == State::Inside {
                continue;
            }
            // r points from the known sample toward the pixel being filled.
            let (rx, ry) = (-dx as f32, -dy as f32);
            let len = len2.sqrt();
            let mut dir = (rx * gx + ry * gy) / len;
            if dir.abs() <= 0.01 {
                dir = 1.0e-6;
            }
            let dst = 1.0 / (len2 * len);
            let lev = 1.0 / (1.0 + (t[k] - t[idx]).abs());
            let weight = (dir * dst * lev).abs();
            let base = k * CHANNELS;
            for c in 0..CHANNELS {
                acc[c] += weight * f32::from(frame.data[base + c]);
            }
            total += weight;
        }
    }

    if total > 0.0 {
        let base = idx * CHANNELS;
        for c in 0..CHANNELS {
            frame.data[base + c] = (acc[c] / total).round().clamp(0.0, 255.0) as u8;
        }
    }
}
