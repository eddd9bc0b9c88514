//! Resource names
//!
//! Every server-side object is identified by a hierarchical path
//! `projects/{p}/locations/{l}/{collection}/{id}`, with two nested kinds
//! (feature views under feature online stores, evaluations under models).
//! Short forms - a bare id, or an id plus parent id - are accepted at
//! construction and normalized using the ambient [`Context`].

use crate::config::Context;
use crate::error::{Error, Result};

/// Every resource kind the client models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Model,
    Endpoint,
    CustomJob,
    BatchPredictionJob,
    PipelineJob,
    FeatureOnlineStore,
    FeatureView,
    Index,
    ModelMonitor,
    PersistentResource,
    ModelEvaluation,
}

impl ResourceKind {
    /// Collection segment used in resource paths
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Model => "models",
            ResourceKind::Endpoint => "endpoints",
            ResourceKind::CustomJob => "customJobs",
            ResourceKind::BatchPredictionJob => "batchPredictionJobs",
            ResourceKind::PipelineJob => "pipelineJobs",
            ResourceKind::FeatureOnlineStore => "featureOnlineStores",
            ResourceKind::FeatureView => "featureViews",
            ResourceKind::Index => "indexes",
            ResourceKind::ModelMonitor => "modelMonitors",
            ResourceKind::PersistentResource => "persistentResources",
            ResourceKind::ModelEvaluation => "evaluations",
        }
    }

    /// Enclosing kind for nested resources
    pub fn parent_kind(&self) -> Option<ResourceKind> {
        match self {
            ResourceKind::FeatureView => Some(ResourceKind::FeatureOnlineStore),
            ResourceKind::ModelEvaluation => Some(ResourceKind::Model),
            _ => None,
        }
    }
}

/// Canonical, parsed resource identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    pub project: String,
    pub location: String,
    pub kind: ResourceKind,
    pub id: String,
    /// Id of the enclosing resource, for nested kinds
    pub parent_id: Option<String>,
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.parent_id, self.kind.parent_kind()) {
            (Some(parent_id), Some(parent_kind)) => write!(
                f,
                "projects/{}/locations/{}/{}/{}/{}/{}",
                self.project,
                self.location,
                parent_kind.collection(),
                parent_id,
                self.kind.collection(),
                self.id
            ),
            _ => write!(
                f,
                "projects/{}/locations/{}/{}/{}",
                self.project,
                self.location,
                self.kind.collection(),
                self.id
            ),
        }
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl ResourceName {
    /// Parse a fully-qualified path for `kind`
    ///
    /// Accepts the versioned form and the UI-prefixed variant embedded in
    /// operation URIs. Unknown shapes are rejected.
    pub fn parse(kind: ResourceKind, input: &str) -> Result<Self> {
        let trimmed = input
            .trim_start_matches("/ui/")
            .trim_start_matches("/v1/")
            .trim_start_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();

        let malformed =
            || Error::BadArgument(format!("malformed {} name: {}", kind.collection(), input));

        if segments.len() < 6 || segments[0] != "projects" || segments[2] != "locations" {
            return Err(malformed());
        }
        let project = segments[1];
        let location = segments[3];
        if !valid_segment(project) || !valid_segment(location) {
            return Err(malformed());
        }

        let rest = &segments[4..];
        match (rest.len(), kind.parent_kind()) {
            (2, _) if rest[0] == kind.collection() && valid_segment(rest[1]) => Ok(Self {
                project: project.to_string(),
                location: location.to_string(),
                kind,
                id: rest[1].to_string(),
                parent_id: None,
            }),
            (4, Some(parent_kind))
                if rest[0] == parent_kind.collection()
                    && rest[2] == kind.collection()
                    && valid_segment(rest[1])
                    && valid_segment(rest[3]) =>
            {
                Ok(Self {
                    project: project.to_string(),
                    location: location.to_string(),
                    kind,
                    id: rest[3].to_string(),
                    parent_id: Some(rest[1].to_string()),
                })
            }
            _ => Err(malformed()),
        }
    }

    /// Normalize a name-or-id for `kind` against the context
    ///
    /// A bare id is qualified with the context's project and location (and
    /// `parent_id` for nested kinds). A full path must agree with any
    /// explicit project/location the context carries; a conflict is rejected
    /// rather than silently preferring either side.
    pub fn resolve(
        kind: ResourceKind,
        name_or_id: &str,
        ctx: &Context,
        parent_id: Option<&str>,
    ) -> Result<Self> {
        if name_or_id.contains('/') {
            let parsed = Self::parse(kind, name_or_id)?;
            if let Some(explicit) = &ctx.project {
                if explicit != &parsed.project {
                    return Err(Error::BadArgument(format!(
                        "project '{}' conflicts with resource name '{}'",
                        explicit, name_or_id
                    )));
                }
            }
            if let Some(explicit) = &ctx.location {
                if explicit != &parsed.location {
                    return Err(Error::BadArgument(format!(
                        "location '{}' conflicts with resource name '{}'",
                        explicit, name_or_id
                    )));
                }
            }
            return Ok(parsed);
        }

        if !valid_segment(name_or_id) {
            return Err(Error::BadArgument(format!(
                "invalid {} id: '{}'",
                kind.collection(),
                name_or_id
            )));
        }

        let parent_id = match kind.parent_kind() {
            Some(parent_kind) => Some(
                parent_id
                    .ok_or_else(|| {
                        Error::BadArgument(format!(
                            "{} id '{}' needs its enclosing {} id",
                            kind.collection(),
                            name_or_id,
                            parent_kind.collection()
                        ))
                    })?
                    .to_string(),
            ),
            None => None,
        };

        Ok(Self {
            project: ctx.project()?,
            location: ctx.location()?,
            kind,
            id: name_or_id.to_string(),
            parent_id,
        })
    }

    /// Path of the collection this resource lives in
    pub fn collection_path(&self) -> String {
        let full = self.to_string();
        full.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::builder()
            .project("demo-project")
            .location("us-central1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_top_level() {
        let name =
            ResourceName::parse(ResourceKind::CustomJob, "projects/p/locations/l/customJobs/123")
                .unwrap();
        assert_eq!(name.project, "p");
        assert_eq!(name.location, "l");
        assert_eq!(name.id, "123");
        assert_eq!(name.to_string(), "projects/p/locations/l/customJobs/123");
    }

    #[test]
    fn test_parse_nested_feature_view() {
        let name = ResourceName::parse(
            ResourceKind::FeatureView,
            "projects/p/locations/l/featureOnlineStores/store/featureViews/view",
        )
        .unwrap();
        assert_eq!(name.parent_id.as_deref(), Some("store"));
        assert_eq!(
            name.to_string(),
            "projects/p/locations/l/featureOnlineStores/store/featureViews/view"
        );
    }

    #[test]
    fn test_parse_ui_prefixed_variant() {
        let name = ResourceName::parse(
            ResourceKind::Endpoint,
            "/ui/projects/p/locations/l/endpoints/9",
        )
        .unwrap();
        assert_eq!(name.to_string(), "projects/p/locations/l/endpoints/9");
    }

    #[test]
    fn test_parse_rejects_wrong_collection() {
        assert!(ResourceName::parse(
            ResourceKind::Model,
            "projects/p/locations/l/endpoints/9"
        )
        .is_err());
    }

    #[test]
    fn test_resolve_bare_id_uses_context() {
        let name = ResourceName::resolve(ResourceKind::Model, "77", &ctx(), None).unwrap();
        assert_eq!(
            name.to_string(),
            "projects/demo-project/locations/us-central1/models/77"
        );
    }

    #[test]
    fn test_resolve_conflicting_project_rejected() {
        let err = ResourceName::resolve(
            ResourceKind::Model,
            "projects/other-project/locations/us-central1/models/77",
            &ctx(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn test_resolve_full_name_matching_context() {
        let name = ResourceName::resolve(
            ResourceKind::Model,
            "projects/demo-project/locations/us-central1/models/77",
            &ctx(),
            None,
        )
        .unwrap();
        assert_eq!(name.id, "77");
    }

    #[test]
    fn test_resolve_nested_requires_parent() {
        let err =
            ResourceName::resolve(ResourceKind::FeatureView, "view", &ctx(), None).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));

        let name =
            ResourceName::resolve(ResourceKind::FeatureView, "view", &ctx(), Some("store"))
                .unwrap();
        assert_eq!(name.parent_id.as_deref(), Some("store"));
    }

    #[test]
    fn test_collection_path() {
        let name = ResourceName::resolve(ResourceKind::Endpoint, "9", &ctx(), None).unwrap();
        assert_eq!(
            name.collection_path(),
            "projects/demo-project/locations/us-central1/endpoints"
        );
    }
}
