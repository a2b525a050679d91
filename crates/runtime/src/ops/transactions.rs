// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Explicit transaction entry points. The target database is the
//! caller's restricted database, or the system database.

use blite_auth::User;
use blite_core::Result;
use tracing::instrument;
use uuid::Uuid;

use crate::ServerContext;

#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn begin(ctx: &ServerContext, user: &User) -> Result<Uuid> {
	if !user.active {
		return Err(blite_core::Error::inactive_user(&user.name));
	}
	let database = ctx.default_database(user);
	let session = ctx.coordinator.begin(&user.name, &database).await?;
	Ok(session.id())
}

#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn commit(ctx: &ServerContext, user: &User, id: Uuid) -> Result<()> {
	ctx.coordinator.commit(id, &user.name).await
}

#[instrument(skip(ctx, user), fields(user = %user.name))]
pub async fn rollback(ctx: &ServerContext, user: &User, id: Uuid) -> Result<()> {
	ctx.coordinator.rollback(id, &user.name).await
}
