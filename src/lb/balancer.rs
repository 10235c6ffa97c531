use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::dispatch::DispatchRequest;
use crate::registry::Replica;

/// Load balancing policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Rotate through the candidates in order
    RoundRobin,
    /// Uniform random pick
    Random,
    /// Random pick biased by replica weight
    WeightedRandom,
    /// First healthy candidate, first candidate as fallback
    LeastConnections,
}

impl Policy {
    /// Parse a policy name from configuration; unknown names fall back to
    /// the default weighted-random policy
    pub fn from_name(name: &str) -> Self {
        match name {
            "round_robin" => Policy::RoundRobin,
            "random" => Policy::Random,
            "least_connections" => Policy::LeastConnections,
            _ => Policy::WeightedRandom,
        }
    }
}

/// Selects one replica from a candidate list.
///
/// The candidates handed in are already filtered to healthy replicas by the
/// dispatcher; an empty list yields no selection and is mapped to the
/// "no healthy replica" failure upstream.
pub struct LoadBalancer {
    policy: Policy,
    /// Rotation counter for round-robin
    counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            counter: AtomicUsize::new(0),
        }
    }

    /// Pick one replica. The request is not consulted by the current
    /// policies but is part of the signature for policies that will be.
    pub fn select(
        &self,
        replicas: &[Arc<Replica>],
        request: &DispatchRequest,
    ) -> Option<Arc<Replica>> {
        if replicas.is_empty() {
            return None;
        }

        let _ = request;
        match self.policy {
            Policy::RoundRobin => self.select_round_robin(replicas),
            Policy::Random => Some(Self::select_random(replicas)),
            Policy::WeightedRandom => Some(Self::select_weighted_random(replicas)),
            Policy::LeastConnections => Some(Self::select_least_connections(replicas)),
        }
    }

    fn select_round_robin(&self, replicas: &[Arc<Replica>]) -> Option<Arc<Replica>> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % replicas.len();
        Some(Arc::clone(&replicas[index]))
    }

    fn select_random(replicas: &[Arc<Replica>]) -> Arc<Replica> {
        let index = rand::thread_rng().gen_range(0..replicas.len());
        Arc::clone(&replicas[index])
    }

    fn select_weighted_random(replicas: &[Arc<Replica>]) -> Arc<Replica> {
        let total_weight: u64 = replicas.iter().map(|r| u64::from(r.weight)).sum();
        if total_weight == 0 {
            return Self::select_random(replicas);
        }

        let drawn = rand::thread_rng().gen_range(0..total_weight);
        let mut running = 0u64;
        for replica in replicas {
            running += u64::from(replica.weight);
            if drawn < running {
                return Arc::clone(replica);
            }
        }

        // Running sum never exceeded the draw; hand back the last candidate
        Arc::clone(replicas.last().expect("candidate list is non-empty"))
    }

    fn select_least_connections(replicas: &[Arc<Replica>]) -> Arc<Replica> {
        replicas
            .iter()
            .find(|r| r.is_healthy())
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&replicas[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    fn test_request() -> DispatchRequest {
        DispatchRequest::new(Method::GET, "/user-orch/profile".to_string())
    }

    fn candidates(weights: &[u32]) -> Vec<Arc<Replica>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                Arc::new(
                    Replica::new(
                        format!("r{}", i),
                        format!("http://127.0.0.1:{}", 9001 + i),
                        "user-orch",
                        *w,
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_list_selects_nothing() {
        let lb = LoadBalancer::new(Policy::WeightedRandom);
        assert!(lb.select(&[], &test_request()).is_none());
    }

    #[test]
    fn test_round_robin_rotates_uniformly() {
        let lb = LoadBalancer::new(Policy::RoundRobin);
        let replicas = candidates(&[1, 1, 1]);
        let request = test_request();

        let picks: Vec<String> = (0..6)
            .map(|_| lb.select(&replicas, &request).unwrap().name.clone())
            .collect();

        assert_eq!(picks, vec!["r0", "r1", "r2", "r0", "r1", "r2"]);
    }

    #[test]
    fn test_random_stays_in_range() {
        let lb = LoadBalancer::new(Policy::Random);
        let replicas = candidates(&[1, 1, 1, 1]);
        let request = test_request();

        for _ in 0..200 {
            let picked = lb.select(&replicas, &request).unwrap();
            assert!(replicas.iter().any(|r| Arc::ptr_eq(r, &picked)));
        }
    }

    #[test]
    fn test_weighted_selection_converges_to_weight_ratio() {
        let lb = LoadBalancer::new(Policy::WeightedRandom);
        let replicas = candidates(&[1, 9]);
        let request = test_request();

        let trials = 10_000;
        let mut heavy_hits = 0usize;
        for _ in 0..trials {
            if lb.select(&replicas, &request).unwrap().name == "r1" {
                heavy_hits += 1;
            }
        }

        // Expected share is 90%; accept anything at or above 85%
        assert!(
            heavy_hits * 100 >= trials * 85,
            "weight-9 replica got {}/{} picks",
            heavy_hits,
            trials
        );
    }

    #[test]
    fn test_weighted_single_replica() {
        let lb = LoadBalancer::new(Policy::WeightedRandom);
        let replicas = candidates(&[5]);
        let request = test_request();

        for _ in 0..10 {
            assert_eq!(lb.select(&replicas, &request).unwrap().name, "r0");
        }
    }

    #[test]
    fn test_least_connections_prefers_first_healthy() {
        let lb = LoadBalancer::new(Policy::LeastConnections);
        let replicas = candidates(&[1, 1, 1]);
        let request = test_request();

        replicas[0].set_healthy(false);
        assert_eq!(lb.select(&replicas, &request).unwrap().name, "r1");

        // All unhealthy falls back to the first candidate
        for replica in &replicas {
            replica.set_healthy(false);
        }
        assert_eq!(lb.select(&replicas, &request).unwrap().name, "r0");
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(Policy::from_name("round_robin"), Policy::RoundRobin);
        assert_eq!(Policy::from_name("random"), Policy::Random);
        assert_eq!(Policy::from_name("least_connections"), Policy::LeastConnections);
        assert_eq!(Policy::from_name("weighted_random"), Policy::WeightedRandom);
        assert_eq!(Policy::from_name("anything-else"), Policy::WeightedRandom);
    }
}
