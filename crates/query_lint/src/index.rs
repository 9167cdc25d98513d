use std::collections::HashMap;

use serde::Serialize;

use crate::config::{SignatureMode, ThresholdTiers};
use crate::issue::{Context, IssueSubject, Severity};
use crate::normalize::{normalize, NormalizedShape};
use crate::record::{Frame, ParamValue, QueryRecord};

/// Parameter list rendered by value with type tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalParams(String);

impl CanonicalParams {
    pub fn of(params: &[ParamValue]) -> Self {
        let mut out = String::from("[");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            param.write_canonical(&mut out);
        }
        out.push(']');
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Signature {
    Shape(NormalizedShape),
    Parameterized {
        shape: NormalizedShape,
        params: CanonicalParams,
    },
}

impl Signature {
    pub fn shape(&self) -> &NormalizedShape {
        match self {
            Signature::Shape(shape) | Signature::Parameterized { shape, .. } => shape,
        }
    }

    pub fn is_parameterized(&self) -> bool {
        matches!(self, Signature::Parameterized { .. })
    }
}

/// Records sharing one signature, in trace order.
#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    signature: Signature,
    members: Vec<&'a QueryRecord>,
    first_position: usize,
    total_time_ms: f64,
}

impl<'a> Bucket<'a> {
    fn new(signature: Signature, first_position: usize) -> Self {
        Self {
            signature,
            members: Vec::new(),
            first_position,
            total_time_ms: 0.0,
        }
    }

    fn push(&mut self, record: &'a QueryRecord) {
        self.total_time_ms += record.time_ms();
        self.members.push(record);
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn shape(&self) -> &NormalizedShape {
        self.signature.shape()
    }

    pub fn members(&self) -> &[&'a QueryRecord] {
        &self.members
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// More than one record carries this signature.
    pub fn is_repeated(&self) -> bool {
        self.members.len() > 1
    }

    pub fn total_time_ms(&self) -> f64 {
        self.total_time_ms
    }

    pub fn avg_time_ms(&self) -> f64 {
        if self.members.is_empty() {
            0.0
        } else {
            self.total_time_ms / self.members.len() as f64
        }
    }

    /// Position of the first member among the indexed records.
    pub fn first_position(&self) -> usize {
        self.first_position
    }

    pub fn first_backtrace(&self) -> Option<&'a [Frame]> {
        self.members
            .iter()
            .copied()
            .find_map(|record| record.backtrace.as_deref().filter(|bt| !bt.is_empty()))
    }

    pub fn last_backtrace(&self) -> Option<&'a [Frame]> {
        self.members
            .iter()
            .rev()
            .copied()
            .find_map(|record| record.backtrace.as_deref().filter(|bt| !bt.is_empty()))
    }

    /// Number of distinct parameter lists among members that have them.
    pub fn distinct_parameter_sets(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        for record in &self.members {
            if let Some(params) = record.parameters.as_deref() {
                seen.insert(CanonicalParams::of(params));
            }
        }
        seen.len()
    }

    pub fn classify(&self, tiers: &ThresholdTiers<usize>) -> Option<Severity> {
        classify_severity(self, tiers)
    }
}

impl IssueSubject for Bucket<'_> {
    fn occurrences(&self) -> usize {
        self.count()
    }

    fn members(&self) -> impl Iterator<Item = &QueryRecord> + '_ {
        self.members.iter().copied()
    }

    fn total_time_ms(&self) -> f64 {
        self.total_time_ms
    }

    fn describe(&self, context: &mut Context) {
        context.insert("shape".to_string(), self.shape().as_str().into());
        context.insert("count".to_string(), self.count().into());
        context.insert("avg_time_ms".to_string(), self.avg_time_ms().into());
        if let Signature::Parameterized { params, .. } = &self.signature {
            context.insert("parameters".to_string(), params.as_str().into());
        }
    }
}

/// Count-based severity: `critical` at or above `tiers.critical`, and so on
/// down; `None` below `tiers.info`.
pub fn classify_severity(bucket: &Bucket<'_>, tiers: &ThresholdTiers<usize>) -> Option<Severity> {
    tiers.classify(bucket.count())
}

/// Groups `records` by signature in one pass. Buckets come back in order of
/// their first member.
///
/// In [`SignatureMode::ParamAware`] records are split by parameter values,
/// but only when every record of a shape carries parameters. A shape with
/// any parameter-less record is reported as a single shape-only bucket,
/// since equality of the unknown parameters cannot be established.
pub fn index<'a, I>(records: I, mode: SignatureMode) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a QueryRecord>,
{
    match mode {
        SignatureMode::ShapeOnly => index_by_shape(records),
        SignatureMode::ParamAware => index_by_params(records),
    }
}

fn shape_of(record: &QueryRecord) -> NormalizedShape {
    if record.sql.trim().is_empty() {
        tracing::warn!("trace entry with empty SQL grouped under the empty shape");
    }
    normalize(&record.sql)
}

fn index_by_shape<'a, I>(records: I) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a QueryRecord>,
{
    let mut buckets: Vec<Bucket<'a>> = Vec::new();
    let mut positions: HashMap<NormalizedShape, usize> = HashMap::new();

    for (position, record) in records.into_iter().enumerate() {
        let shape = shape_of(record);
        let slot = match positions.get(&shape) {
            Some(slot) => *slot,
            None => {
                positions.insert(shape.clone(), buckets.len());
                buckets.push(Bucket::new(Signature::Shape(shape), position));
                buckets.len() - 1
            }
        };
        buckets[slot].push(record);
    }

    buckets
}

struct ShapeGroup<'a> {
    shape: NormalizedShape,
    first_position: usize,
    all: Vec<&'a QueryRecord>,
    by_params: Vec<Bucket<'a>>,
    params_slots: HashMap<CanonicalParams, usize>,
    has_unparameterized: bool,
}

impl<'a> ShapeGroup<'a> {
    fn push(&mut self, position: usize, record: &'a QueryRecord) {
        self.all.push(record);
        let Some(params) = record.parameters.as_deref() else {
            self.has_unparameterized = true;
            return;
        };
        if self.has_unparameterized {
            return;
        }

        let params = CanonicalParams::of(params);
        let slot = match self.params_slots.get(&params) {
            Some(slot) => *slot,
            None => {
                self.params_slots.insert(params.clone(), self.by_params.len());
                self.by_params.push(Bucket::new(
                    Signature::Parameterized {
                        shape: self.shape.clone(),
                        params,
                    },
                    position,
                ));
                self.by_params.len() - 1
            }
        };
        self.by_params[slot].push(record);
    }

    fn finish(self) -> Vec<Bucket<'a>> {
        if !self.has_unparameterized {
            return self.by_params;
        }
        let mut bucket = Bucket::new(Signature::Shape(self.shape), self.first_position);
        for record in self.all {
            bucket.push(record);
        }
        vec![bucket]
    }
}

fn index_by_params<'a, I>(records: I) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a QueryRecord>,
{
    let mut groups: Vec<ShapeGroup<'a>> = Vec::new();
    let mut positions: HashMap<NormalizedShape, usize> = HashMap::new();

    for (position, record) in records.into_iter().enumerate() {
        let shape = shape_of(record);
        let slot = match positions.get(&shape) {
            Some(slot) => *slot,
            None => {
                positions.insert(shape.clone(), groups.len());
                groups.push(ShapeGroup {
                    shape,
                    first_position: position,
                    all: Vec::new(),
                    by_params: Vec::new(),
                    params_slots: HashMap::new(),
                    has_unparameterized: false,
                });
                groups.len() - 1
            }
        };
        groups[slot].push(position, record);
    }

    let mut buckets: Vec<Bucket<'a>> = groups.into_iter().flat_map(ShapeGroup::finish).collect();
    buckets.sort_by_key(Bucket::first_position);
    buckets
}
