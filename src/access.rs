use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    #[serde(rename = "SCHOOLADMIN")]
    SchoolAdmin,
    /// A parent.
    User,
}

/// Verified caller, supplied with every request by the host shell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub school_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_params",
        }
    }
}

/// Ownership facts about a pupil, as read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PupilRef {
    pub id: String,
    pub parent_id: Option<String>,
    pub classroom_id: String,
    pub school_id: String,
}

#[derive(Debug, Clone, Copy)]
pub enum PupilLookup<'a> {
    NotRequested,
    Missing,
    Found(&'a PupilRef),
}

/// Picks the school whose calendar the caller may see. `Ok(None)` means the
/// answer is an empty calendar, not an error.
pub fn resolve_schedule_school(
    identity: &Identity,
    pupil: PupilLookup<'_>,
    school_param: Option<&str>,
) -> Result<Option<String>, AccessError> {
    let resolved = match pupil {
        PupilLookup::Found(p) => Some(p.school_id.clone()),
        PupilLookup::Missing => return Ok(None),
        PupilLookup::NotRequested => school_param
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "all")
            .map(str::to_string),
    };

    match identity.role {
        Role::Admin => Ok(resolved),
        Role::SchoolAdmin => {
            let own = identity
                .school_id
                .as_deref()
                .ok_or_else(|| AccessError::BadRequest("no school assigned".to_string()))?;
            if resolved.as_deref().is_some_and(|s| s != own) {
                return Err(AccessError::Forbidden("school belongs to another admin".to_string()));
            }
            Ok(Some(own.to_string()))
        }
        Role::User => {
            let PupilLookup::Found(p) = pupil else {
                return Err(AccessError::BadRequest("pupilId required".to_string()));
            };
            if p.parent_id.as_deref().is_some_and(|parent| parent != identity.user_id) {
                return Err(AccessError::Forbidden("pupil belongs to another parent".to_string()));
            }
            Ok(resolved)
        }
    }
}

pub fn require_admin(identity: &Identity) -> Result<(), AccessError> {
    if identity.role == Role::Admin {
        Ok(())
    } else {
        Err(AccessError::Unauthorized)
    }
}

/// Admins manage every school; a school admin only their own.
pub fn require_school_staff(identity: &Identity, school_id: &str) -> Result<(), AccessError> {
    match identity.role {
        Role::Admin => Ok(()),
        Role::SchoolAdmin if identity.school_id.as_deref() == Some(school_id) => Ok(()),
        Role::SchoolAdmin => Err(AccessError::Forbidden("not your school".to_string())),
        Role::User => Err(AccessError::Unauthorized),
    }
}

/// School filter for staff list views: admins choose, school admins are locked.
pub fn staff_school_scope(
    identity: &Identity,
    school_param: Option<&str>,
) -> Result<Option<String>, AccessError> {
    let requested = school_param
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "all");
    match identity.role {
        Role::Admin => Ok(requested.map(str::to_string)),
        Role::SchoolAdmin => {
            let own = identity
                .school_id
                .as_deref()
                .ok_or_else(|| AccessError::Forbidden("no school assigned".to_string()))?;
            if requested.is_some_and(|s| s != own) {
                return Err(AccessError::Forbidden("not your school".to_string()));
            }
            Ok(Some(own.to_string()))
        }
        Role::User => Err(AccessError::Unauthorized),
    }
}

/// Parents act on their own pupils; admins on any.
pub fn require_parent_of(identity: &Identity, pupil: &PupilRef) -> Result<(), AccessError> {
    match identity.role {
        Role::Admin => Ok(()),
        Role::User if pupil.parent_id.as_deref() == Some(identity.user_id.as_str()) => Ok(()),
        Role::User => Err(AccessError::Forbidden("pupil belongs to another parent".to_string())),
        Role::SchoolAdmin => Err(AccessError::Unauthorized),
    }
}
