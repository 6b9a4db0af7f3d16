//! The `Collection` handler variant of §4.5: an ordered list of children,
//! all invoked by default (no short-circuiting), with their errors
//! aggregated rather than the first one winning.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::BoxError;
use crate::handler::{BoxHandler, Handler};

/// Aggregates every error raised by a [`Collection`]'s children during one
/// request, per §4.5's open question: "when more than one child errors,
/// the reported cause is all of them, not just the first" (see
/// `DESIGN.md`'s open-question decision).
#[derive(Debug, Default)]
pub struct MultiError {
    causes: Vec<BoxError>,
}

impl MultiError {
    #[must_use]
    pub fn causes(&self) -> &[BoxError] {
        &self.causes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    fn push(&mut self, cause: BoxError) {
        self.causes.push(cause);
    }

    fn into_result(self) -> Result<(), MultiError> {
        if self.causes.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} handler(s) failed: ", self.causes.len())?;
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// An ordered list of children. By default every child runs regardless of
/// whether an earlier one reported itself handled (§4.5: "requests marked
/// handled do not short-circuit by default"); `short_circuiting` switches
/// to stop-at-first-handled.
pub struct Collection {
    children: Vec<BoxHandler>,
    short_circuit: bool,
}

impl Collection {
    #[must_use]
    pub fn new(children: Vec<BoxHandler>) -> Self {
        Self {
            children,
            short_circuit: false,
        }
    }

    /// Opt into stopping at the first child that reports itself handled,
    /// per the open-question decision recorded in `DESIGN.md`.
    #[must_use]
    pub fn short_circuiting(mut self) -> Self {
        self.short_circuit = true;
        self
    }
}

impl Handler for Collection {
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            let mut handled = false;
            let mut errors = MultiError::default();
            for child in &self.children {
                if handled && self.short_circuit {
                    break;
                }
                match child.handle(target.clone(), channel.clone()).await {
                    Ok(h) => handled |= h,
                    Err(e) => errors.push(e),
                }
            }
            errors
                .into_result()
                .map_err(|e| Box::new(e) as BoxError)?;
            Ok(handled)
        }
    }
}
