//! Mock workload generation for demos and testing

use rand::Rng;

/// Shape of one stage in a mock chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// One item
    Single,
    /// An array processed in batches
    Array { len: usize, batch_size: usize },
    /// Two equally long arrays processed pairwise
    Paired { len: usize, batch_size: usize },
}

/// A stage of a mock chain; each stage runs after the previous one
#[derive(Debug, Clone)]
pub struct MockStage {
    /// Human-readable name, `stage_<n>`
    pub name: String,
    pub kind: StageKind,
    /// Simulated work per element, in milliseconds
    pub work_ms: Vec<u64>,
}

impl MockStage {
    /// Number of elements in the stage
    pub fn len(&self) -> usize {
        self.work_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.work_ms.is_empty()
    }
}

/// Configuration for mock chain generation
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Number of stages in the chain
    pub stage_count: usize,
    /// Probability (0.0-1.0) that a stage is a single item
    pub single_probability: f64,
    /// Probability (0.0-1.0) that a non-single stage is paired
    pub paired_probability: f64,
    /// Maximum array length for array stages
    pub max_array_len: usize,
    /// Maximum batch size for array stages
    pub max_batch_size: usize,
    /// Upper bound of the simulated per-element work
    pub max_work_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            stage_count: 8,
            single_probability: 0.3,
            paired_probability: 0.3,
            max_array_len: 40,
            max_batch_size: 10,
            max_work_ms: 20,
        }
    }
}

/// Generates a mock chain with randomized stage shapes
pub fn generate_mock_chain(count: usize) -> Vec<MockStage> {
    generate_mock_chain_with_config(MockConfig {
        stage_count: count,
        ..Default::default()
    })
}

/// Generates a mock chain with custom configuration
pub fn generate_mock_chain_with_config(config: MockConfig) -> Vec<MockStage> {
    let mut rng = rand::thread_rng();
    let max_len = config.max_array_len.max(1);
    let max_batch = config.max_batch_size.max(1);

    (1..=config.stage_count)
        .map(|i| {
            let kind = if rng.gen_bool(config.single_probability) {
                StageKind::Single
            } else {
                let len = rng.gen_range(1..=max_len);
                let batch_size = rng.gen_range(1..=max_batch);
                if rng.gen_bool(config.paired_probability) {
                    StageKind::Paired { len, batch_size }
                } else {
                    StageKind::Array { len, batch_size }
                }
            };

            let len = match kind {
                StageKind::Single => 1,
                StageKind::Array { len, .. } | StageKind::Paired { len, .. } => len,
            };
            let work_ms = (0..len)
                .map(|_| rng.gen_range(0..=config.max_work_ms))
                .collect();

            MockStage {
                name: format!("stage_{}", i),
                kind,
                work_ms,
            }
        })
        .collect()
}
