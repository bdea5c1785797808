//! ACL Evaluator (component E): effective-permission computation over
//! user/group/role/other principals, with resource-local inheritance.

use crate::domain::{permission, AclEntry, PrincipalType};
use crate::ids::ROOT_UID;
use uuid::Uuid;

/// Computes effective permissions for `(resource, user, roles)` as a
/// bitmask, given the resource's ACL rows.
///
/// Algorithm (§4.5):
/// 1. Partition rows by principal match.
/// 2. If any `user`-typed row matches, effective = OR(user rows) | OR(matching role/group rows)
///    -- user rows are additive with role/group rows, never masking them.
/// 3. Otherwise, if any role/group row matches, effective = OR(those rows).
/// 4. Otherwise, effective = OR(`other` rows).
/// 5. ROOT always grants `read` regardless of ACL rows.
pub fn effective_permissions(resource_uid: Uuid, user: &str, roles: &[String], rows: &[AclEntry]) -> u32 {
    if resource_uid == ROOT_UID {
        return permission::READ | compute(user, roles, rows);
    }
    compute(user, roles, rows)
}

fn compute(user: &str, roles: &[String], rows: &[AclEntry]) -> u32 {
    let user_bits: u32 = rows
        .iter()
        .filter(|r| r.principal_type == PrincipalType::User && r.principal == user)
        .fold(0, |acc, r| acc | r.permissions);

    let role_bits: u32 = rows
        .iter()
        .filter(|r| {
            matches!(r.principal_type, PrincipalType::Role | PrincipalType::Group) && roles.iter().any(|role| role == &r.principal)
        })
        .fold(0, |acc, r| acc | r.permissions);

    let has_user_row = rows.iter().any(|r| r.principal_type == PrincipalType::User && r.principal == user);
    let has_role_row = rows.iter().any(|r| {
        matches!(r.principal_type, PrincipalType::Role | PrincipalType::Group) && roles.iter().any(|role| role == &r.principal)
    });

    if has_user_row {
        return user_bits | role_bits;
    }
    if has_role_row {
        return role_bits;
    }

    rows.iter()
        .filter(|r| r.principal_type == PrincipalType::Other)
        .fold(0, |acc, r| acc | r.permissions)
}

/// `check_permission(r, u, roles, required)` as required by §8 invariant 6.
pub fn check_permission(resource_uid: Uuid, user: &str, roles: &[String], required: u32, rows: &[AclEntry]) -> bool {
    let effective = effective_permissions(resource_uid, user, roles, rows);
    (effective & required) == required
}

/// Upsert-merge a grant into an existing row set, returning the updated
/// bitmask for `(principal, principal_type)`.
pub fn merge_grant(existing: Option<u32>, granted: u32) -> u32 {
    existing.unwrap_or(0) | granted
}

/// Clear bits on revoke; the caller removes the row entirely when the
/// resulting mask is zero.
pub fn apply_revoke(existing: u32, revoked: u32) -> u32 {
    existing & !revoked
}

/// Default ACL rows granted to a newly created resource: the creator gets
/// full rights, `other` gets read.
pub fn default_acls(resource_uid: Uuid, creator: &str) -> Vec<AclEntry> {
    vec![
        AclEntry { resource_uid, principal: creator.to_string(), principal_type: PrincipalType::User, permissions: permission::FULL },
        AclEntry { resource_uid, principal: "*".to_string(), principal_type: PrincipalType::Other, permissions: permission::READ },
    ]
}

/// Copy all of a parent's ACL rows onto a child at creation time (no
/// run-time walk up the tree is ever performed).
pub fn inherited_acls(parent_rows: &[AclEntry], child_uid: Uuid) -> Vec<AclEntry> {
    parent_rows
        .iter()
        .map(|r| AclEntry { resource_uid: child_uid, principal: r.principal.clone(), principal_type: r.principal_type, permissions: r.permissions })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(principal: &str, t: PrincipalType, perms: u32) -> AclEntry {
        AclEntry { resource_uid: Uuid::new_v4(), principal: principal.to_string(), principal_type: t, permissions: perms }
    }

    #[test]
    fn acl_matrix_scenario() {
        let resource = Uuid::new_v4();
        let rows = vec![
            row("users", PrincipalType::Role, permission::READ),
            row("contributors", PrincipalType::Role, permission::READ | permission::WRITE),
            row("admins", PrincipalType::Role, permission::READ | permission::WRITE | permission::DELETE | permission::EXECUTE),
        ];

        assert!(!check_permission(resource, "u1", &["users".to_string()], permission::WRITE, &rows));
        assert!(check_permission(resource, "u2", &["contributors".to_string()], permission::WRITE, &rows));
        assert!(check_permission(resource, "u3", &["admins".to_string()], permission::DELETE, &rows));
    }

    #[test]
    fn root_always_grants_read() {
        assert!(check_permission(ROOT_UID, "anyone", &[], permission::READ, &[]));
    }

    #[test]
    fn user_rows_are_additive_with_role_rows() {
        let rows = vec![row("alice", PrincipalType::User, permission::WRITE), row("eng", PrincipalType::Role, permission::READ)];
        let resource = Uuid::new_v4();
        let effective = effective_permissions(resource, "alice", &["eng".to_string()], &rows);
        assert_eq!(effective, permission::WRITE | permission::READ);
    }

    #[test]
    fn grant_then_revoke_restores_prior_state() {
        let granted = merge_grant(None, permission::READ | permission::WRITE);
        assert_eq!(granted, permission::READ | permission::WRITE);
        let revoked = apply_revoke(granted, permission::WRITE);
        assert_eq!(revoked, permission::READ);
    }
}
