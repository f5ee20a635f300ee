//! Lobby invocations.
//!
//! Roster changes are announced by the host as multicasts. `kickUser` and
//! `toggleUserRole` are requests to the host, honoured only for admins and
//! never against the requester itself. `kick` is what the host sends the
//! user it removes, right before it closes that user's link.

use crate::state::{ChatLine, LobbyMutation, LobbyState, User, UserRole};
use roomcast_rpc::{Invocation, InvocationOptions, InvocationRegistry, Outcome, Realm, RpcError};
use roomcast_types::{DisconnectReason, PeerId};
use tracing::info;

/// Constructors for every lobby invocation.
#[derive(Debug, Clone)]
pub struct LobbyActions {
    /// `userJoined(userId, name)`, multicast.
    pub user_joined: Invocation,
    /// `userLeft(userId)`, multicast.
    pub user_left: Invocation,
    /// `syncUsers(users)`, host to one client.
    pub sync_users: Invocation,
    /// `userRoleChanged(userId, role, enabled)`, multicast.
    pub user_role_changed: Invocation,
    /// `kick(reason)`, host to the user being removed.
    pub kick: Invocation,
    /// `kickUser(userId)`, to the host.
    pub kick_user: Invocation,
    /// `toggleUserRole(userId, role)`, to the host.
    pub toggle_user_role: Invocation,
}

fn arity(n: usize) -> InvocationOptions {
    InvocationOptions::new().validate(move |args| args.len() == n)
}

impl LobbyActions {
    pub fn register(registry: &mut InvocationRegistry<LobbyState>) -> Result<Self, RpcError> {
        let user_joined = registry.register(
            "userJoined",
            Realm::Multicast,
            |call| {
                let id: PeerId = call.arg(0)?;
                let name: String = call.arg(1)?;
                let is_local = call
                    .context
                    .session()
                    .is_some_and(|s| s.local_peer_id() == id);
                let user = User::new(id, name.clone());
                Ok(Outcome::then(move |scope| {
                    scope.apply(LobbyMutation::UserJoined(user));
                    if !is_local {
                        scope.apply(LobbyMutation::AddChat(ChatLine::now(format!(
                            "{name} has joined"
                        ))));
                    }
                }))
            },
            arity(2),
        )?;

        let user_left = registry.register(
            "userLeft",
            Realm::Multicast,
            |call| {
                let id: PeerId = call.arg(0)?;
                let name = call.state.read(|s| s.user_name(&id));
                Ok(Outcome::then(move |scope| {
                    scope.apply(LobbyMutation::AddChat(ChatLine::now(format!(
                        "{name} has left"
                    ))));
                    scope.apply(LobbyMutation::UserLeft(id));
                }))
            },
            arity(1),
        )?;

        let sync_users = registry.register(
            "syncUsers",
            Realm::Client,
            |call| Ok(Outcome::Applied(LobbyMutation::SyncUsers(call.arg(0)?))),
            arity(1),
        )?;

        let user_role_changed = registry.register(
            "userRoleChanged",
            Realm::Multicast,
            |call| {
                Ok(Outcome::Applied(LobbyMutation::SetUserRole {
                    user_id: call.arg(0)?,
                    role: call.arg(1)?,
                    enabled: call.arg(2)?,
                }))
            },
            arity(3),
        )?;

        let kick = registry.register(
            "kick",
            Realm::Client,
            |call| {
                let reason: DisconnectReason = call.arg(0)?;
                info!(reason = %reason, "Lobby: removed by host");
                Ok(Outcome::then(move |scope| {
                    scope.apply(LobbyMutation::SetDisconnectReason(reason));
                    scope.with_session(|session| session.close());
                }))
            },
            arity(1),
        )?;

        let kick_user = {
            let kick = kick.clone();
            registry.register(
                "kickUser",
                Realm::Server,
                move |call| {
                    let target: PeerId = call.arg(0)?;
                    let requester = &call.context.origin().id;
                    if *requester == target {
                        return Ok(Outcome::rejected("users cannot kick themselves"));
                    }
                    if !call.state.read(|s| s.is_admin(requester)) {
                        return Ok(Outcome::rejected(format!(
                            "'{requester}' is not an admin"
                        )));
                    }
                    if call
                        .context
                        .session()
                        .is_some_and(|s| s.local_peer_id() == target)
                    {
                        return Ok(Outcome::rejected("the host cannot be kicked"));
                    }
                    if call.state.read(|s| s.user(&target).is_none()) {
                        return Ok(Outcome::rejected(format!("no user '{target}'")));
                    }

                    info!(target = %target, by = %requester, "Lobby: kicking user");
                    let notice = kick.call((DisconnectReason::Kicked,))?.to([target.clone()]);
                    Ok(Outcome::then(move |scope| {
                        scope.dispatch(notice);
                        scope.with_session(move |session| session.close_peer(&target));
                    }))
                },
                arity(1),
            )?
        };

        let toggle_user_role = {
            let changed = user_role_changed.clone();
            registry.register(
                "toggleUserRole",
                Realm::Server,
                move |call| {
                    let target: PeerId = call.arg(0)?;
                    let role: UserRole = call.arg(1)?;
                    let requester = &call.context.origin().id;
                    if *requester == target {
                        return Ok(Outcome::rejected("users cannot change their own roles"));
                    }
                    if !call.state.read(|s| s.is_admin(requester)) {
                        return Ok(Outcome::rejected(format!(
                            "'{requester}' is not an admin"
                        )));
                    }
                    let Some(enabled) = call
                        .state
                        .read(|s| s.user(&target).map(|u| !u.roles.contains(&role)))
                    else {
                        return Ok(Outcome::rejected(format!("no user '{target}'")));
                    };

                    let request = changed.call((target, role, enabled))?;
                    Ok(Outcome::then(move |scope| scope.dispatch(request)))
                },
                arity(2),
            )?
        };

        Ok(Self {
            user_joined,
            user_left,
            sync_users,
            user_role_changed,
            kick,
            kick_user,
            toggle_user_role,
        })
    }
}
