// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

use blite_auth::{PermissionEntry, User};
use blite_core::Result;
use blite_runtime::ServerContext;
use blite_runtime::ops::admin;

use crate::dispatch::Handled;
use crate::proto::{AdminRequest, Response, WirePermission, WireTenant, WireUser};

pub(crate) async fn handle(ctx: &ServerContext, user: &User, request: AdminRequest) -> Result<Handled> {
	let response = match request {
		AdminRequest::CreateUser { name, permissions, namespace, restricted_database } => {
			let permissions: Vec<PermissionEntry> = permissions.iter().map(PermissionEntry::from).collect();
			let (created, api_key) =
				admin::create_user(ctx, user, &name, permissions, namespace, restricted_database).await?;
			Response::UserCreated { user: WireUser::from(&created), api_key }
		}
		AdminRequest::RevokeUser { name } => {
			admin::revoke_user(ctx, user, &name).await?;
			Response::Ack
		}
		AdminRequest::RotateKey { name } => {
			let api_key = admin::rotate_key(ctx, user, &name).await?;
			Response::KeyRotated { api_key }
		}
		AdminRequest::ListUsers => {
			let users = admin::list_users(ctx, user)?;
			Response::Users { users: users.iter().map(WireUser::from).collect() }
		}
		AdminRequest::UpdatePerms { name, permissions } => {
			let permissions: Vec<PermissionEntry> = permissions.iter().map(PermissionEntry::from).collect();
			let updated = admin::update_permissions(ctx, user, &name, permissions).await?;
			Response::User { user: WireUser::from(&updated) }
		}
		AdminRequest::ProvisionTenant { id } => {
			admin::provision_tenant(ctx, user, &id).await?;
			Response::Ack
		}
		AdminRequest::DeprovisionTenant { id, delete_files } => {
			admin::deprovision_tenant(ctx, user, &id, delete_files).await?;
			Response::Ack
		}
		AdminRequest::ListTenants => {
			let tenants = admin::list_tenants(ctx, user).await?;
			Response::Tenants { tenants: tenants.into_iter().map(WireTenant::from).collect() }
		}
	};
	Ok(Handled::Unary(response))
}
