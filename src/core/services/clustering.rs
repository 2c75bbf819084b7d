//! Density-based clustering of face embeddings.
//!
//! Embeddings are scaled to unit length and grouped with DBSCAN over
//! euclidean distance. Points are visited in input order and cluster ids are
//! handed out in discovery order, so identical input and config always give
//! identical labels.

use super::traits::FaceClusteringService;
use crate::core::config::ClusteringConfig;
use crate::core::face::FaceEmbedding;
use crate::core::method::VersionedMethod;
use crate::core::ml_file::{ClusterLabel, ClusteringResult};
use crate::error::ServiceError;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Deterministic DBSCAN clusterer
#[derive(Debug, Default, Clone)]
pub struct DbscanClusterer;

impl DbscanClusterer {
    pub fn new() -> Self {
        Self
    }

    fn normalize(embedding: &[f32]) -> Vec<f32> {
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return embedding.to_vec();
        }
        embedding.iter().map(|v| v / norm).collect()
    }

    fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

impl FaceClusteringService for DbscanClusterer {
    fn method(&self) -> VersionedMethod {
        VersionedMethod::new("Dbscan", 1)
    }

    fn cluster(
        &self,
        embeddings: &[FaceEmbedding],
        config: &ClusteringConfig,
    ) -> Result<ClusteringResult, ServiceError> {
        let Some(first) = embeddings.first() else {
            return Ok(ClusteringResult::new(Vec::new()));
        };

        let dimension = first.len();
        if let Some(bad) = embeddings.iter().position(|e| e.len() != dimension) {
            return Err(ServiceError::Clustering(format!(
                "embedding {} has {} values, expected {}",
                bad,
                embeddings[bad].len(),
                dimension
            )));
        }

        let points: Vec<Vec<f32>> = embeddings.par_iter().map(|e| Self::normalize(e)).collect();
        let epsilon_sq = config.epsilon * config.epsilon;
        let min_points = config.min_cluster_size.max(1);

        // Neighbourhoods include the point itself.
        let neighbours: Vec<Vec<usize>> = (0..points.len())
            .into_par_iter()
            .map(|i| {
                (0..points.len())
                    .filter(|&j| Self::squared_distance(&points[i], &points[j]) <= epsilon_sq)
                    .collect()
            })
            .collect();

        let mut labels: Vec<Option<ClusterLabel>> = vec![None; points.len()];
        let mut next_cluster = 0u32;

        for i in 0..points.len() {
            if labels[i].is_some() {
                continue;
            }
            if neighbours[i].len() < min_points {
                labels[i] = Some(ClusterLabel::Noise);
                continue;
            }

            let cluster = ClusterLabel::Cluster(next_cluster);
            next_cluster += 1;
            labels[i] = Some(cluster);

            let mut frontier: VecDeque<usize> = neighbours[i].iter().copied().collect();
            while let Some(j) = frontier.pop_front() {
                match labels[j] {
                    Some(ClusterLabel::Noise) => labels[j] = Some(cluster),
                    Some(ClusterLabel::Cluster(_)) => {}
                    None => {
                        labels[j] = Some(cluster);
                        if neighbours[j].len() >= min_points {
                            frontier.extend(neighbours[j].iter().copied());
                        }
                    }
                }
            }
        }

        Ok(ClusteringResult::new(
            labels
                .into_iter()
                .map(|label| label.unwrap_or(ClusterLabel::Noise))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_cluster_size: usize, epsilon: f32) -> ClusteringConfig {
        ClusteringConfig {
            min_input_size: 0,
            min_cluster_size,
            epsilon,
        }
    }

    fn blob(center: [f32; 2], count: usize) -> Vec<FaceEmbedding> {
        (0..count)
            .map(|i| vec![center[0] + i as f32 * 0.01, center[1] - i as f32 * 0.01])
            .collect()
    }

    #[test]
    fn empty_input_gives_empty_result() {
        let result = DbscanClusterer::new().cluster(&[], &config(2, 0.5)).unwrap();
        assert!(result.labels.is_empty());
    }

    #[test]
    fn separates_two_groups() {
        let mut embeddings = blob([1.0, 0.0], 4);
        embeddings.extend(blob([0.0, 1.0], 4));

        let result = DbscanClusterer::new()
            .cluster(&embeddings, &config(3, 0.3))
            .unwrap();

        assert_eq!(result.cluster_count(), 2);
        assert!(result.labels[..4].iter().all(|l| *l == ClusterLabel::Cluster(0)));
        assert!(result.labels[4..].iter().all(|l| *l == ClusterLabel::Cluster(1)));
    }

    #[test]
    fn isolated_point_is_noise() {
        let mut embeddings = blob([1.0, 0.0], 4);
        embeddings.push(vec![-1.0, 0.0]);

        let result = DbscanClusterer::new()
            .cluster(&embeddings, &config(3, 0.3))
            .unwrap();

        assert_eq!(result.labels[4], ClusterLabel::Noise);
        assert_eq!(result.noise(), vec![4]);
    }

    #[test]
    fn identical_input_gives_identical_labels() {
        let mut embeddings = blob([1.0, 0.2], 6);
        embeddings.extend(blob([-0.3, 1.0], 5));
        embeddings.push(vec![0.0, -1.0]);

        let clusterer = DbscanClusterer::new();
        let a = clusterer.cluster(&embeddings, &config(3, 0.3)).unwrap();
        let b = clusterer.cluster(&embeddings, &config(3, 0.3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let result = DbscanClusterer::new().cluster(&embeddings, &config(1, 0.3));
        assert!(matches!(result, Err(ServiceError::Clustering(_))));
    }
}
