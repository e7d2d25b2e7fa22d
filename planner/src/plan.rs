use corelib::{ProviderId, Quality, Request, SourceKind};

/// One element of an ordered degradation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Cache,
    Primary(ProviderId),
    Alternative(ProviderId),
    Interpolation,
    Static,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    pub min_acceptable_quality: Quality,
}

impl Step {
    pub fn source_kind(&self) -> SourceKind {
        match self.kind {
            StepKind::Cache => SourceKind::Cache,
            StepKind::Primary(_) => SourceKind::FreshApi,
            StepKind::Alternative(_) => SourceKind::AltProvider,
            StepKind::Interpolation => SourceKind::Interpolated,
            StepKind::Static => SourceKind::Static,
        }
    }
}

/// The ordered fallback chain the Request Governor works through for one
/// request. Built once, consulted step by step; no I/O of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradationPlan {
    pub steps: Vec<Step>,
}

impl DegradationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

const EMERGENCY_FLOOR: Quality = Quality::new(0.0, 0.0, 0.0);
const NORMAL_CACHE_FLOOR: Quality = Quality::new(0.3, 0.0, 0.0);
const PROVIDER_FLOOR: Quality = Quality::new(0.0, 0.0, 0.0);
const INTERPOLATION_FLOOR: Quality = Quality::new(0.0, 0.0, 0.0);
const STATIC_FLOOR: Quality = Quality::new(0.0, 0.0, 0.0);

/// Builds the degradation chain for `request`: cache, primary provider,
/// registered alternatives, interpolation (price-like types only), static
/// fallback. Pure: takes every external fact as a parameter.
#[tracing::instrument(skip(fallback_providers), fields(request_id = %request.id))]
pub fn build_plan(
    request: &Request,
    primary: Option<ProviderId>,
    fallback_providers: &[ProviderId],
    emergency_mode: bool,
) -> DegradationPlan {
    let mut steps = Vec::new();

    if request.allow_cache {
        let floor = if emergency_mode {
            EMERGENCY_FLOOR
        } else {
            NORMAL_CACHE_FLOOR
        };
        steps.push(Step {
            kind: StepKind::Cache,
            min_acceptable_quality: floor,
        });
    }

    if let Some(provider) = primary {
        steps.push(Step {
            kind: StepKind::Primary(provider),
            min_acceptable_quality: PROVIDER_FLOOR,
        });
    }

    for alt in fallback_providers {
        if Some(alt) == primary.as_ref() {
            continue;
        }
        steps.push(Step {
            kind: StepKind::Alternative(alt.clone()),
            min_acceptable_quality: PROVIDER_FLOOR,
        });
    }

    if request.data_type.supports_interpolation() {
        steps.push(Step {
            kind: StepKind::Interpolation,
            min_acceptable_quality: INTERPOLATION_FLOOR,
        });
    }

    steps.push(Step {
        kind: StepKind::Static,
        min_acceptable_quality: STATIC_FLOOR,
    });

    DegradationPlan { steps }
}
