use async_trait::async_trait;
use std::sync::Arc;

use super::{Identifier, Identity, IdentityError};

/// Lookups the resolver dispatches to. Each method returns every match so
/// the resolver can tell a unique hit from an ambiguous one.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Students whose admission number equals `admission_number` (uppercased)
    async fn students_by_admission_number(
        &self,
        admission_number: &str,
    ) -> Result<Vec<Identity>, IdentityError>;

    /// Identities whose normalized phone equals `phone`
    async fn identities_by_phone(&self, phone: &str) -> Result<Vec<Identity>, IdentityError>;

    /// Admins and teachers matching a staff number or email exactly, falling
    /// back to a case-insensitive name fragment
    async fn staff_by_identifier(&self, identifier: &str) -> Result<Vec<Identity>, IdentityError>;

    async fn identity_by_id(&self, id: &str) -> Result<Option<Identity>, IdentityError>;
}

/// Outcome of resolving an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Identity),
    NotFound,
    Ambiguous { candidates: usize },
}

impl Resolution {
    fn from_matches(mut matches: Vec<Identity>) -> Self {
        match matches.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Found(matches.remove(0)),
            candidates => Resolution::Ambiguous { candidates },
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Resolution::Found(_) => "found",
            Resolution::NotFound => "not_found",
            Resolution::Ambiguous { .. } => "ambiguous",
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Classify `raw` and run exactly one lookup for its shape.
    pub async fn resolve(&self, raw: &str) -> Result<(Identifier, Resolution), IdentityError> {
        let identifier = Identifier::classify(raw)?;
        let resolution = self.resolve_identifier(&identifier).await?;
        Ok((identifier, resolution))
    }

    pub async fn resolve_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Resolution, IdentityError> {
        let matches = match identifier {
            Identifier::AdmissionNumber(adm) => {
                self.store.students_by_admission_number(adm).await?
            }
            Identifier::Phone(phone) => self.store.identities_by_phone(phone).await?,
            Identifier::Staff(ident) => self.store.staff_by_identifier(ident).await?,
        };

        let resolution = Resolution::from_matches(matches);
        tracing::debug!(
            kind = ?identifier.kind(),
            status = resolution.status(),
            "Resolved identifier"
        );
        Ok(resolution)
    }
}
