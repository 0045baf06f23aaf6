//! Fixed-iteration k-means palette extraction.

/// Number of refinement passes. Fixed; there is no convergence test.
pub const KMEANS_ITERATIONS: usize = 6;

/// One palette entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaletteCluster {
    /// Channel-wise mean of the members, unrounded.
    pub centroid: [f64; 3],
    /// Pooled colors assigned to this cluster in the final pass.
    pub member_count: usize,
}

impl PaletteCluster {
    /// Centroid rounded to 8-bit channels.
    pub fn rgb(&self) -> [u8; 3] {
        self.centroid.map(|channel| channel.clamp(0.0, 255.0).round() as u8)
    }
}

/// Cluster `colors` into `k` centroids.
///
/// Centroids start as the first `k` pooled colors and are refined for
/// exactly [`KMEANS_ITERATIONS`] passes. Each color joins its nearest
/// centroid by Euclidean RGB distance, the first one on a tie. Centroids
/// holding exactly the same value as that winner also take the color, so
/// coincident centroids move together. A cluster that ends a pass empty is
/// reset to black. The result is in initialization order.
///
/// If fewer than `k` colors are pooled, the missing centroids take no part
/// in the first pass and start the second pass as black.
pub fn kmeans(colors: &[[u8; 3]], k: usize) -> Vec<PaletteCluster> {
    let mut centroids: Vec<Option<[f64; 3]>> = (0..k)
        .map(|index| colors.get(index).map(|color| color.map(f64::from)))
        .collect();
    let mut counts = vec![0usize; k];
    let mut nearest = Vec::with_capacity(k);

    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![[0.0f64; 3]; k];
        counts.iter_mut().for_each(|count| *count = 0);

        for color in colors {
            let point = color.map(f64::from);
            nearest_centroids(&centroids, point, &mut nearest);
            for &index in &nearest {
                counts[index] += 1;
                for channel in 0..3 {
                    sums[index][channel] += point[channel];
                }
            }
        }

        centroids = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &count)| {
                if count == 0 {
                    Some([0.0; 3])
                } else {
                    Some(sum.map(|channel| channel / count as f64))
                }
            })
            .collect();
    }

    centroids
        .into_iter()
        .zip(counts)
        .map(|(centroid, member_count)| PaletteCluster {
            centroid: centroid.unwrap_or([0.0; 3]),
            member_count,
        })
        .collect()
}

/// Collect into `out` the first centroid nearest to `point`, followed by
/// any later centroid equal to it.
fn nearest_centroids(centroids: &[Option<[f64; 3]>], point: [f64; 3], out: &mut Vec<usize>) {
    out.clear();
    let mut winner: Option<(usize, [f64; 3])> = None;
    let mut closest = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let Some(centroid) = centroid else {
            continue;
        };
        let distance = ((point[0] - centroid[0]).powi(2)
            + (point[1] - centroid[1]).powi(2)
            + (point[2] - centroid[2]).powi(2))
        .sqrt();
        if distance < closest {
            closest = distance;
            winner = Some((index, *centroid));
        }
    }

    let Some((first, value)) = winner else {
        return;
    };
    out.push(first);
    out.extend(
        centroids
            .iter()
            .enumerate()
            .skip(first + 1)
            .filter(|(_, centroid)| **centroid == Some(value))
            .map(|(index, _)| index),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_colors_fill_every_centroid() {
        let colors = vec![[40, 80, 120]; 3];
        let palette = kmeans(&colors, 3);
        assert_eq!(palette.len(), 3);
        for cluster in &palette {
            assert_eq!(cluster.centroid, [40.0, 80.0, 120.0]);
            assert_eq!(cluster.member_count, 3);
        }
    }

    #[test]
    fn equidistant_color_joins_the_first_centroid() {
        let palette = kmeans(&[[0, 0, 0], [2, 0, 0], [1, 0, 0]], 2);
        assert_eq!(palette[0].centroid, [0.5, 0.0, 0.0]);
        assert_eq!(palette[1].centroid, [2.0, 0.0, 0.0]);
        assert_eq!(palette[0].member_count, 2);
        assert_eq!(palette[1].member_count, 1);
    }

    #[test]
    fn separates_two_obvious_groups() {
        let mut colors = vec![[250, 10, 10]; 5];
        colors.extend(vec![[10, 10, 250]; 5]);
        colors.swap(1, 9);
        let palette = kmeans(&colors, 2);
        assert_eq!(palette[0].rgb(), [250, 10, 10]);
        assert_eq!(palette[1].rgb(), [10, 10, 250]);
        assert_eq!(palette[0].member_count + palette[1].member_count, 10);
    }

    #[test]
    fn output_keeps_initialization_order() {
        // Small cluster first, large cluster second.
        let mut colors = vec![[0, 0, 0], [255, 255, 255]];
        colors.extend(vec![[250, 250, 250]; 20]);
        let palette = kmeans(&colors, 2);
        assert_eq!(palette[0].member_count, 1);
        assert_eq!(palette[1].member_count, 21);
    }

    #[test]
    fn empty_cluster_resets_to_black() {
        // The third centroid never attracts a bright color.
        let colors = vec![[200, 200, 200], [210, 200, 200]];
        let palette = kmeans(&colors, 3);
        assert_eq!(palette[0].rgb(), [200, 200, 200]);
        assert_eq!(palette[1].rgb(), [210, 200, 200]);
        assert_eq!(palette[2].centroid, [0.0, 0.0, 0.0]);
        assert_eq!(palette[2].member_count, 0);
    }

    #[test]
    fn fewer_colors_than_clusters() {
        let palette = kmeans(&[[9, 9, 9]], 3);
        assert_eq!(palette.len(), 3);
        assert_eq!(palette[0].rgb(), [9, 9, 9]);
        assert!(kmeans(&[], 2).iter().all(|cluster| cluster.member_count == 0));
    }
}
