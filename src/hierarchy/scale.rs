use crate::sparse::{AffinityRow, SortedRow};

/// One level of the hierarchy.
///
/// Scale 0 holds every data point with identity mappings and unit weights.
/// Scale `s > 0` holds the landmarks picked from scale `s - 1`, their
/// row-stochastic transition matrix, and the area of influence linking the
/// two (one row per scale `s - 1` vertex).
#[derive(Debug, Clone, PartialEq)]
pub struct Scale<R = SortedRow> {
    pub(crate) landmark_to_original_data_idx: Vec<u32>,
    pub(crate) landmark_to_previous_scale_idx: Vec<u32>,
    pub(crate) previous_scale_to_landmark_idx: Vec<i32>,
    pub(crate) landmark_weight: Vec<f32>,
    pub(crate) transition_matrix: Vec<R>,
    pub(crate) area_of_influence: Vec<R>,
}

impl<R: AffinityRow> Scale<R> {
    /// Finest scale over `transition_matrix.len()` data points.
    pub(crate) fn first(transition_matrix: Vec<R>) -> Self {
        let n = transition_matrix.len();
        let identity: Vec<u32> = (0..n as u32).collect();
        Self {
            landmark_to_original_data_idx: identity.clone(),
            landmark_to_previous_scale_idx: identity,
            previous_scale_to_landmark_idx: Vec::new(),
            landmark_weight: vec![1.0; n],
            transition_matrix,
            area_of_influence: Vec::new(),
        }
    }

    /// Number of landmarks (data points at scale 0).
    pub fn len(&self) -> usize {
        self.transition_matrix.len()
    }

    /// True if the scale holds no landmarks.
    pub fn is_empty(&self) -> bool {
        self.transition_matrix.is_empty()
    }

    /// Data-point index of each landmark.
    pub fn landmark_to_original_data_idx(&self) -> &[u32] {
        &self.landmark_to_original_data_idx
    }

    /// Previous-scale index of each landmark.
    pub fn landmark_to_previous_scale_idx(&self) -> &[u32] {
        &self.landmark_to_previous_scale_idx
    }

    /// Landmark index of each previous-scale vertex, `-1` if not a landmark.
    /// Empty at scale 0.
    pub fn previous_scale_to_landmark_idx(&self) -> &[i32] {
        &self.previous_scale_to_landmark_idx
    }

    /// Landmark of previous-scale vertex `prev`, if it was selected.
    pub fn landmark_of(&self, prev: usize) -> Option<u32> {
        self.previous_scale_to_landmark_idx
            .get(prev)
            .and_then(|&l| u32::try_from(l).ok())
    }

    /// Mass represented by each landmark.
    pub fn landmark_weight(&self) -> &[f32] {
        &self.landmark_weight
    }

    /// Row-stochastic transition matrix over the landmarks.
    pub fn transition_matrix(&self) -> &[R] {
        &self.transition_matrix
    }

    /// Influence of each landmark over each previous-scale vertex. Empty at
    /// scale 0.
    pub fn area_of_influence(&self) -> &[R] {
        &self.area_of_influence
    }

    /// Lower bound on the memory held by the scale, in megabytes.
    ///
    /// Counts vector capacities and stored sparse entries.
    pub fn min_memory_occupation(&self) -> f64 {
        let entry = std::mem::size_of::<(u32, f32)>();
        let mut bytes = self.landmark_to_original_data_idx.capacity() * 4
            + self.landmark_to_previous_scale_idx.capacity() * 4
            + self.previous_scale_to_landmark_idx.capacity() * 4
            + self.landmark_weight.capacity() * 4;
        for row in self
            .transition_matrix
            .iter()
            .chain(self.area_of_influence.iter())
        {
            bytes += row.len() * entry;
        }
        bytes as f64 / 1024.0 / 1024.0
    }
}
