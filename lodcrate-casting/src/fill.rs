//! Dilation and fill of cast images
//!
//! Covered texels are grown outward ring by ring over 8-connected
//! neighbours. Dilation grows a fixed number of rings; the fill modes then
//! decide what happens to the rest of the image.

use crate::settings::FillMode;
use lodcrate_core::{Color, TextureImage};

fn neighbours(index: usize, width: usize, height: usize) -> impl Iterator<Item = usize> {
    let (x, y) = ((index % width) as i64, (index / width) as i64);
    (-1i64..=1)
        .flat_map(move |dy| (-1i64..=1).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| {
            (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height
        })
        .map(move |(nx, ny)| ny as usize * width + nx as usize)
}

/// Grow covered texels by up to `rings` rings (all the way when `None`).
/// New texels take the average of their covered neighbours, or the first
/// covered neighbour when `average` is false. Returns the rings grown.
fn grow(image: &mut TextureImage, covered: &mut [bool], rings: Option<u32>, average: bool) -> u32 {
    let (width, height) = (image.width as usize, image.height as usize);
    let mut queued = vec![false; covered.len()];
    let mut frontier: Vec<usize> = Vec::new();
    for i in 0..covered.len() {
        if !covered[i] && neighbours(i, width, height).any(|n| covered[n]) {
            queued[i] = true;
            frontier.push(i);
        }
    }

    let mut grown = 0;
    while !frontier.is_empty() && rings.map_or(true, |r| grown < r) {
        let values: Vec<(usize, Color)> = frontier
            .iter()
            .map(|&i| {
                let mut sum = Color::TRANSPARENT;
                let mut count = 0.0f32;
                for n in neighbours(i, width, height).filter(|&n| covered[n]) {
                    let c = image.pixels[n];
                    if !average {
                        return (i, c);
                    }
                    sum = sum.zip(c, |a, b| a + b);
                    count += 1.0;
                }
                (i, sum.map(|v| v / count.max(1.0)))
            })
            .collect();
        for &(i, c) in &values {
            image.pixels[i] = c;
            covered[i] = true;
        }
        let mut next = Vec::new();
        for &(i, _) in &values {
            for n in neighbours(i, width, height) {
                if !covered[n] && !queued[n] {
                    queued[n] = true;
                    next.push(n);
                }
            }
        }
        frontier = next;
        grown += 1;
    }
    grown
}

/// Dilate and fill an image in place. `covered` marks the texels the
/// caster wrote and is updated to the texels holding a value afterwards.
pub fn fill_image(image: &mut TextureImage, covered: &mut [bool], dilation: u32, mode: FillMode) {
    if covered.len() != image.pixels.len() || !covered.iter().any(|&c| c) {
        return;
    }
    if dilation > 0 {
        grow(image, covered, Some(dilation), true);
    }
    match mode {
        FillMode::Interpolate => {
            grow(image, covered, None, true);
        }
        FillMode::NearestNeighbor => {
            grow(image, covered, None, false);
        }
        FillMode::NoFill => {}
    }
}
