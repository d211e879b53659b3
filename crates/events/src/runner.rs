//! Projection runner utilities (read model builders).
//!
//! Deterministic replay with cursor tracking, without storage assumptions.

use thiserror::Error;

use crate::{EventEnvelope, Projection};

/// Tracks how far into the ledger a projection has folded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    last_position: u64,
    applied: u64,
}

impl ProjectionCursor {
    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    /// Number of envelopes applied through this runner.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("ledger position must be positive")]
    ZeroPosition,

    #[error("non-monotonic ledger position (last={last}, found={found})")]
    NonMonotonicPosition { last: u64, found: u64 },
}

/// Runs envelopes through a projection in strictly increasing position order.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Current cursor (if any envelopes were applied).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single envelope, enforcing strictly increasing positions.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ProjectionError> {
        let found = envelope.position();
        if found == 0 {
            return Err(ProjectionError::ZeroPosition);
        }

        let last = self.cursor.map(|c| c.last_position).unwrap_or(0);
        if found <= last {
            return Err(ProjectionError::NonMonotonicPosition { last, found });
        }

        self.projection.apply(envelope);
        let applied = self.cursor.map(|c| c.applied).unwrap_or(0) + 1;
        self.cursor = Some(ProjectionCursor {
            last_position: found,
            applied,
        });
        Ok(())
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full ledger.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}
