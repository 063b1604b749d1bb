//! server::scope
//!
//! Which branch or release a route addresses.
//!
//! Routes are grouped into scope routers (project, patch, workspace,
//! conflict resolution, backup, version). Each router is tagged with a
//! [`ScopeKind`] extension; the [`Scope`] extractor combines that tag with
//! the path parameters and the caller into a [`SourceContext`].

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use super::caller::Api;
use super::error::ApiError;
use super::state::AppState;
use crate::core::types::{ProjectId, VersionId, WorkspaceId};
use crate::core::workspace::{
    WorkspaceAccessType, WorkspaceSource, WorkspaceSpecification, WorkspaceType,
};
use crate::service::{Sdlc, SdlcError, SourceContext};

/// Path segment naming the most recent version.
pub const LATEST_VERSION: &str = "latest";

/// Tag attached to each scope router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Project,
    Patch,
    Workspace(WorkspaceType, WorkspaceAccessType),
    Version,
}

/// The caller's facade plus the project and context a request addresses.
#[derive(Debug)]
pub struct Scope {
    pub sdlc: Sdlc,
    pub project: ProjectId,
    pub ctx: SourceContext,
}

impl Scope {
    /// The workspace source (project or patch) of the scope.
    pub fn source(&self) -> Result<WorkspaceSource, ApiError> {
        match &self.ctx {
            SourceContext::Project => Ok(WorkspaceSource::Project),
            SourceContext::Patch(version) => Ok(WorkspaceSource::patch(*version)),
            SourceContext::Workspace(spec) => Ok(spec.source),
            SourceContext::Version(_) => Err(SdlcError::invalid("versions have no workspaces").into()),
        }
    }

    pub fn workspace(&self) -> Result<&WorkspaceSpecification, ApiError> {
        self.ctx
            .workspace()
            .ok_or_else(|| SdlcError::invalid(format!("{} is not a workspace", self.ctx)).into())
    }
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SdlcError::Internal(format!("route has no '{name}' parameter")).into())
}

/// Parse a version path segment.
pub fn parse_version(raw: &str) -> Result<VersionId, ApiError> {
    raw.parse::<VersionId>()
        .map_err(|e| ApiError::from(SdlcError::from(e)))
}

impl FromRequestParts<AppState> for Scope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let kind = parts
            .extensions
            .get::<ScopeKind>()
            .copied()
            .ok_or_else(|| SdlcError::Internal("route has no scope".into()))?;
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| SdlcError::invalid(e.body_text()))?;
        let Api(sdlc) = Api::from_request_parts(parts, state).await?;

        let project = ProjectId::new(param(&params, "project")?).map_err(SdlcError::from)?;
        let source = match params.get("patch") {
            Some(raw) => WorkspaceSource::patch(parse_version(raw)?),
            None => WorkspaceSource::Project,
        };

        let ctx = match kind {
            ScopeKind::Project => SourceContext::Project,
            ScopeKind::Patch => SourceContext::from_source(source),
            ScopeKind::Workspace(workspace_type, access_type) => {
                let id = WorkspaceId::new(param(&params, "workspace")?).map_err(SdlcError::from)?;
                let spec = WorkspaceSpecification::of_type(id, workspace_type, &sdlc.user().user_id, source)
                    .with_access(access_type);
                SourceContext::Workspace(spec)
            }
            ScopeKind::Version => {
                let raw = param(&params, "version")?;
                let version = if raw.eq_ignore_ascii_case(LATEST_VERSION) {
                    sdlc.get_latest_version(&project)
                        .await?
                        .ok_or_else(|| SdlcError::not_found(format!("project {project} has no versions")))?
                        .id
                } else {
                    parse_version(raw)?
                };
                SourceContext::Version(version)
            }
        };

        Ok(Scope { sdlc, project, ctx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_segments() {
        assert_eq!(parse_version("1.2.3").unwrap(), VersionId::new(1, 2, 3));
        let err = parse_version("1.2").unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }
}
