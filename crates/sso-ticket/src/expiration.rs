//! Ticket expiration policies.
//!
//! A policy is an immutable value owned by each ticket. It answers "is this
//! ticket expired" from the ticket's counters and timestamps alone and never
//! mutates the ticket. Expiration is monotone: once a policy reports a ticket
//! as expired it keeps doing so for every later instant.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sso_ticket::ExpirationPolicy;
//!
//! let policy = ExpirationPolicy::multi_time_use_or_timeout(1, Duration::from_secs(10));
//! assert!(policy.is_expired(None));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::authentication::Authentication;
use crate::ticket::TicketState;

/// Rule deciding whether a ticket is expired.
///
/// Every variant treats a missing ticket (`None`) as expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExpirationPolicy {
    /// The ticket never expires on its own.
    NeverExpires,

    /// The ticket is expired from the moment it is created.
    AlwaysExpires,

    /// Expired once `time_to_kill` has elapsed since creation.
    Timeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Absolute ceiling since creation, regardless of use.
    HardTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Expired after `number_of_uses` uses or `time_to_kill` since creation.
    MultiTimeUseOrTimeout {
        number_of_uses: u32,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Expired after `time_to_kill` since creation, or while a used ticket is
    /// re-presented within `time_in_between_uses` of its last use.
    ThrottledUseAndTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
        #[serde(with = "humantime_serde")]
        time_in_between_uses: Duration,
    },

    /// Session policy: hard lifetime since creation plus idle timeout since
    /// last use.
    TicketGrantingTicket {
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Delegates to `remember_me_policy` when the session was created with
    /// the remember-me flag, to `default_policy` otherwise.
    ///
    /// `remember_me` is fixed by [`ExpirationPolicy::for_authentication`] when
    /// the ticket is created and never changes afterwards.
    RememberMe {
        remember_me_policy: Box<ExpirationPolicy>,
        default_policy: Box<ExpirationPolicy>,
        #[serde(default)]
        remember_me: bool,
    },
}

impl ExpirationPolicy {
    /// Creates a creation-based timeout policy.
    #[must_use]
    pub fn timeout(time_to_kill: Duration) -> Self {
        Self::Timeout { time_to_kill }
    }

    /// Creates a hard timeout policy.
    #[must_use]
    pub fn hard_timeout(time_to_kill: Duration) -> Self {
        Self::HardTimeout { time_to_kill }
    }

    /// Creates a use-count or timeout policy.
    #[must_use]
    pub fn multi_time_use_or_timeout(number_of_uses: u32, time_to_kill: Duration) -> Self {
        Self::MultiTimeUseOrTimeout {
            number_of_uses,
            time_to_kill,
        }
    }

    /// Creates a throttling policy.
    #[must_use]
    pub fn throttled_use_and_timeout(time_to_kill: Duration, time_in_between_uses: Duration) -> Self {
        Self::ThrottledUseAndTimeout {
            time_to_kill,
            time_in_between_uses,
        }
    }

    /// Creates the default session policy.
    #[must_use]
    pub fn ticket_granting_ticket(max_time_to_live: Duration, time_to_kill: Duration) -> Self {
        Self::TicketGrantingTicket {
            max_time_to_live,
            time_to_kill,
        }
    }

    /// Creates an unselected remember-me template.
    #[must_use]
    pub fn remember_me(remember_me_policy: ExpirationPolicy, default_policy: ExpirationPolicy) -> Self {
        Self::RememberMe {
            remember_me_policy: Box::new(remember_me_policy),
            default_policy: Box::new(default_policy),
            remember_me: false,
        }
    }

    /// Returns the policy a new ticket for `authentication` should own.
    ///
    /// For [`ExpirationPolicy::RememberMe`] this fixes the branch from the
    /// authentication's remember-me flag; other variants are returned as is.
    #[must_use]
    pub fn for_authentication(&self, authentication: &Authentication) -> Self {
        match self {
            Self::RememberMe {
                remember_me_policy,
                default_policy,
                ..
            } => Self::RememberMe {
                remember_me_policy: remember_me_policy.clone(),
                default_policy: default_policy.clone(),
                remember_me: authentication.is_remember_me(),
            },
            other => other.clone(),
        }
    }

    /// Checks expiration against the current time.
    #[must_use]
    pub fn is_expired(&self, ticket: Option<&TicketState>) -> bool {
        self.is_expired_at(ticket, OffsetDateTime::now_utc())
    }

    /// Checks expiration as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, ticket: Option<&TicketState>, now: OffsetDateTime) -> bool {
        let Some(ticket) = ticket else {
            return true;
        };

        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::Timeout { time_to_kill } | Self::HardTimeout { time_to_kill } => {
                elapsed(ticket.creation_time, now) > *time_to_kill
            }
            Self::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                ticket.count_of_uses >= *number_of_uses
                    || elapsed(ticket.creation_time, now) > *time_to_kill
            }
            Self::ThrottledUseAndTimeout {
                time_to_kill,
                time_in_between_uses,
            } => {
                if elapsed(ticket.creation_time, now) > *time_to_kill {
                    return true;
                }
                ticket.count_of_uses > 0
                    && elapsed(ticket.last_time_used, now) < *time_in_between_uses
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                elapsed(ticket.creation_time, now) > *max_time_to_live
                    || elapsed(ticket.last_time_used, now) > *time_to_kill
            }
            Self::RememberMe {
                remember_me_policy,
                default_policy,
                remember_me,
            } => {
                if *remember_me {
                    remember_me_policy.is_expired_at(Some(ticket), now)
                } else {
                    default_policy.is_expired_at(Some(ticket), now)
                }
            }
        }
    }

    /// Short variant name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NeverExpires => "never_expires",
            Self::AlwaysExpires => "always_expires",
            Self::Timeout { .. } => "timeout",
            Self::HardTimeout { .. } => "hard_timeout",
            Self::MultiTimeUseOrTimeout { .. } => "multi_time_use_or_timeout",
            Self::ThrottledUseAndTimeout { .. } => "throttled_use_and_timeout",
            Self::TicketGrantingTicket { .. } => "ticket_granting_ticket",
            Self::RememberMe { .. } => "remember_me",
        }
    }
}

/// Elapsed time from `since` to `now`, clamped at zero for clock skew.
fn elapsed(since: OffsetDateTime, now: OffsetDateTime) -> Duration {
    Duration::try_from(now - since).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::Principal;

    fn state(policy: &ExpirationPolicy, created: OffsetDateTime) -> TicketState {
        TicketState::new_at("TGT-1-test-node", policy.clone(), created)
    }

    fn all_policies() -> Vec<ExpirationPolicy> {
        let d = Duration::from_secs(5);
        vec![
            ExpirationPolicy::NeverExpires,
            ExpirationPolicy::AlwaysExpires,
            ExpirationPolicy::timeout(d),
            ExpirationPolicy::hard_timeout(d),
            ExpirationPolicy::multi_time_use_or_timeout(5, d),
            ExpirationPolicy::throttled_use_and_timeout(d, Duration::from_secs(1)),
            ExpirationPolicy::ticket_granting_ticket(d, d),
            ExpirationPolicy::remember_me(ExpirationPolicy::NeverExpires, ExpirationPolicy::timeout(d)),
        ]
    }

    #[test]
    fn test_missing_ticket_is_expired_for_every_policy() {
        for policy in all_policies() {
            assert!(policy.is_expired(None), "{} must expire None", policy.name());
        }
    }

    #[test]
    fn test_never_and_always() {
        let now = OffsetDateTime::now_utc();
        let never = ExpirationPolicy::NeverExpires;
        let always = ExpirationPolicy::AlwaysExpires;
        let far_future = now + time::Duration::days(3650);
        assert!(!never.is_expired_at(Some(&state(&never, now)), far_future));
        assert!(always.is_expired_at(Some(&state(&always, now)), now));
    }

    #[test]
    fn test_timeout() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::timeout(Duration::from_millis(5000));
        let ticket = state(&policy, now);

        assert!(!policy.is_expired_at(Some(&ticket), now));
        assert!(!policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(5000)));
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(5001)));
    }

    #[test]
    fn test_hard_timeout_ignores_use() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(2));
        let mut ticket = state(&policy, now);
        ticket.update_last_time_used_at(now + time::Duration::seconds(3));
        ticket.increment_count_of_uses();

        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::seconds(3)));
    }

    #[test]
    fn test_multi_time_use_expires_after_uses() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::multi_time_use_or_timeout(5, Duration::from_millis(5000));
        let mut ticket = state(&policy, now);
        assert!(!policy.is_expired_at(Some(&ticket), now));

        for _ in 0..4 {
            ticket.increment_count_of_uses();
            assert!(!policy.is_expired_at(Some(&ticket), now));
        }
        ticket.increment_count_of_uses();
        assert!(policy.is_expired_at(Some(&ticket), now));
    }

    #[test]
    fn test_multi_time_use_expires_after_timeout() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::multi_time_use_or_timeout(5, Duration::from_millis(5000));
        let ticket = state(&policy, now);
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(5001)));
    }

    #[test]
    fn test_throttled_use() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::throttled_use_and_timeout(
            Duration::from_millis(5000),
            Duration::from_millis(1000),
        );
        let mut ticket = state(&policy, now);
        assert!(!policy.is_expired_at(Some(&ticket), now));

        let used_at = now + time::Duration::milliseconds(100);
        ticket.update_last_time_used_at(used_at);
        ticket.increment_count_of_uses();

        // Re-presented too soon
        assert!(policy.is_expired_at(Some(&ticket), used_at + time::Duration::milliseconds(500)));
        // Waited long enough
        assert!(!policy.is_expired_at(Some(&ticket), used_at + time::Duration::milliseconds(1500)));
        // Past the hard timeout
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(5001)));
    }

    #[test]
    fn test_throttled_unused_ticket_only_times_out() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::throttled_use_and_timeout(
            Duration::from_millis(5000),
            Duration::from_millis(1000),
        );
        let ticket = state(&policy, now);
        assert!(!policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(200)));
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::milliseconds(5001)));
    }

    #[test]
    fn test_ticket_granting_ticket_idle_and_hard_limit() {
        let now = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::ticket_granting_ticket(
            Duration::from_secs(100),
            Duration::from_secs(10),
        );
        let mut ticket = state(&policy, now);

        // Idle too long
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::seconds(11)));

        // Kept alive by use, then hits the hard ceiling
        let mut t = now;
        for _ in 0..9 {
            t += time::Duration::seconds(9);
            ticket.update_last_time_used_at(t);
            assert!(!policy.is_expired_at(Some(&ticket), t));
        }
        ticket.update_last_time_used_at(now + time::Duration::seconds(99));
        assert!(policy.is_expired_at(Some(&ticket), now + time::Duration::seconds(101)));
    }

    #[test]
    fn test_remember_me_selection_is_fixed_at_creation() {
        let now = OffsetDateTime::now_utc();
        let template = ExpirationPolicy::remember_me(
            ExpirationPolicy::hard_timeout(Duration::from_secs(1000)),
            ExpirationPolicy::hard_timeout(Duration::from_secs(10)),
        );

        let remembered = template.for_authentication(&Authentication::new(Principal::new("u")).remember_me());
        let standard = template.for_authentication(&Authentication::new(Principal::new("u")));

        let later = now + time::Duration::seconds(20);
        assert!(!remembered.is_expired_at(Some(&state(&remembered, now)), later));
        assert!(standard.is_expired_at(Some(&state(&standard, now)), later));
    }

    #[test]
    fn test_policy_serde_uses_type_tag() {
        let policy = ExpirationPolicy::multi_time_use_or_timeout(1, Duration::from_secs(10));
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["type"], "multiTimeUseOrTimeout");
        assert_eq!(json["numberOfUses"], 1);
        assert_eq!(json["timeToKill"], "10s");

        let back: ExpirationPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
