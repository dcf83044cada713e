//! Adam optimizer state for one parameter block.
//!
//! Each block keeps its own first/second moment estimates and step counter.
//! Updates are split in two so that a whole iteration can be validated before
//! any parameter is touched:
//!
//! - [`Adam::propose`] computes new parameters and moments from a gradient
//! - [`Adam::commit`] installs a proposal
//!
//! The bias-corrected step follows the usual form
//!
//! ```text
//! m_t = β1 m + (1 - β1) g
//! v_t = β2 v + (1 - β2) g²
//! x  -= lr · sqrt(1 - β2^t) / (1 - β1^t) · m_t / (sqrt(v_t) + ε)
//! ```

pub const DEFAULT_BETA1: f64 = 0.9;
pub const DEFAULT_BETA2: f64 = 0.999;
pub const DEFAULT_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

/// An uncommitted Adam step.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    params: Vec<f64>,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Proposal {
    /// Proposed parameter values.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn is_finite(&self) -> bool {
        self.params.iter().all(|x| x.is_finite())
    }
}

impl Adam {
    /// Optimizer for `len` parameters with default moment decay rates.
    pub fn new(learning_rate: f64, len: usize) -> Self {
        Self {
            learning_rate,
            beta1: DEFAULT_BETA1,
            beta2: DEFAULT_BETA2,
            epsilon: DEFAULT_EPSILON,
            m: vec![0.0; len],
            v: vec![0.0; len],
            t: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of committed steps.
    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Compute one step from `params` along `grad` without changing any state.
    ///
    /// # Panics
    /// Panics if `params` or `grad` do not have [`Adam::len`] elements.
    pub fn propose(&self, params: &[f64], grad: &[f64]) -> Proposal {
        assert_eq!(params.len(), self.len(), "parameter length mismatch");
        assert_eq!(grad.len(), self.len(), "gradient length mismatch");

        let t = self.t + 1;
        let bias1 = 1.0 - self.beta1.powi(t as i32);
        let bias2 = 1.0 - self.beta2.powi(t as i32);
        let step = self.learning_rate * bias2.sqrt() / bias1;

        let mut m = Vec::with_capacity(self.len());
        let mut v = Vec::with_capacity(self.len());
        let mut out = Vec::with_capacity(self.len());
        for i in 0..self.len() {
            let g = grad[i];
            let mi = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            let vi = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            out.push(params[i] - step * mi / (vi.sqrt() + self.epsilon));
            m.push(mi);
            v.push(vi);
        }

        Proposal { params: out, m, v, t }
    }

    /// Install `proposal` into `params` and advance the optimizer state.
    pub fn commit(&mut self, proposal: Proposal, params: &mut [f64]) {
        params.copy_from_slice(&proposal.params);
        self.m = proposal.m;
        self.v = proposal.v;
        self.t = proposal.t;
    }
}
