//! Domain records shared between the gateway and its clients
//!
//! The authoritative family/story/memory records live in the hosted store.
//! Only the records this workspace reads or writes itself are modelled here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Family group membership role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Owner, Role::Editor, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// Action a member may be allowed to perform within a family group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewContent,
    CreateContent,
    EditContent,
    DeleteContent,
    RecordAudio,
    UploadPhotos,
    InviteMembers,
    ManageMembers,
    ManageFamily,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::ViewContent,
        Permission::CreateContent,
        Permission::EditContent,
        Permission::DeleteContent,
        Permission::RecordAudio,
        Permission::UploadPhotos,
        Permission::InviteMembers,
        Permission::ManageMembers,
        Permission::ManageFamily,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewContent => "view_content",
            Permission::CreateContent => "create_content",
            Permission::EditContent => "edit_content",
            Permission::DeleteContent => "delete_content",
            Permission::RecordAudio => "record_audio",
            Permission::UploadPhotos => "upload_photos",
            Permission::InviteMembers => "invite_members",
            Permission::ManageMembers => "manage_members",
            Permission::ManageFamily => "manage_family",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown permission: {}", s)))
    }
}

/// Per-family override of the default role table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub family_group_id: Uuid,
    pub role: Role,
    pub permission: Permission,
    pub allowed: bool,
}

/// Invitation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
            InvitationStatus::Expired => "expired",
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "revoked" => Ok(InvitationStatus::Revoked),
            "expired" => Ok(InvitationStatus::Expired),
            other => Err(Error::InvalidInput(format!("Unknown invitation status: {}", other))),
        }
    }
}

/// Days an invitation link stays valid
pub const INVITATION_VALID_DAYS: i64 = 7;

/// Invitation to join a family group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub token: String,
    pub family_group_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<Uuid>,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    /// Create a pending invitation expiring after [`INVITATION_VALID_DAYS`]
    ///
    /// Owner invitations are rejected; ownership is never transferred by link.
    pub fn new(
        family_group_id: Uuid,
        email: &str,
        role: Role,
        invited_by: Option<Uuid>,
    ) -> crate::Result<Self> {
        if role == Role::Owner {
            return Err(Error::InvalidInput(
                "Invitations cannot grant the owner role".to_string(),
            ));
        }
        let created_at = crate::time::now();
        Ok(Self {
            id: Uuid::new_v4(),
            token: Uuid::new_v4().to_string(),
            family_group_id,
            email: email.trim().to_ascii_lowercase(),
            role,
            invited_by,
            status: InvitationStatus::Pending,
            created_at,
            expires_at: crate::time::days_after(created_at, INVITATION_VALID_DAYS),
        })
    }

    /// Status as seen at `now`: a pending invitation past expiry reads as expired
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && now >= self.expires_at {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }
}
