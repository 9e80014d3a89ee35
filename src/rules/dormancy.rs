//! Zero-trust access rules: dormant accounts and stale patch levels.

use chrono::{DateTime, Utc};
use std::borrow::Cow;

use crate::config::AccessConfig;
use crate::model::{Device, User, UserStatus};

pub const PATCH_WINDOW_FINDING: &str = "patch-window-exceeded";

/// Mark an active user dormant after `dormant_after` without activity.
///
/// One-way: the rule never moves a user back to active. Disabled users are
/// left alone.
pub fn dormant_account<'a>(user: &'a User, now: DateTime<Utc>, policy: &AccessConfig) -> Cow<'a, User> {
  if user.status != UserStatus::Active {
    return Cow::Borrowed(user);
  }
  if now - user.last_activity <= policy.dormant_after() {
    return Cow::Borrowed(user);
  }
  Cow::Owned(User {
    status: UserStatus::Dormant,
    ..user.clone()
  })
}

/// Whether the device's last patch falls outside the window.
pub fn patch_overdue(device: &Device, now: DateTime<Utc>, policy: &AccessConfig) -> bool {
  now - device.last_patched > policy.patch_window()
}

/// Revoke compliance from a device that has not been patched within the window.
///
/// One-way like [`dormant_account`]: only a remote verdict or an operator can
/// restore compliance.
pub fn stale_patch<'a>(device: &'a Device, now: DateTime<Utc>, policy: &AccessConfig) -> Cow<'a, Device> {
  if !device.compliant || !patch_overdue(device, now, policy) {
    return Cow::Borrowed(device);
  }
  let mut next = device.clone();
  next.compliant = false;
  if !next.findings.iter().any(|f| f == PATCH_WINDOW_FINDING) {
    next.findings.push(PATCH_WINDOW_FINDING.to_string());
  }
  Cow::Owned(next)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_inactive_user_goes_dormant_once() {
    let now = Utc::now();
    let policy = AccessConfig::default();
    let user = User {
      id: "u-1".to_string(),
      last_activity: now - Duration::days(120),
      ..User::default()
    };

    let dormant = dormant_account(&user, now, &policy).into_owned();
    assert_eq!(dormant.status, UserStatus::Dormant);
    assert!(matches!(dormant_account(&dormant, now, &policy), Cow::Borrowed(_)));

    // Worse conditions later: still dormant
    let later = now + Duration::days(60);
    assert_eq!(dormant_account(&dormant, later, &policy).status, UserStatus::Dormant);
  }

  #[test]
  fn test_recent_and_disabled_users_untouched() {
    let now = Utc::now();
    let policy = AccessConfig::default();
    let recent = User {
      last_activity: now - Duration::days(3),
      ..User::default()
    };
    assert!(matches!(dormant_account(&recent, now, &policy), Cow::Borrowed(_)));

    let disabled = User {
      status: UserStatus::Disabled,
      last_activity: now - Duration::days(400),
      ..User::default()
    };
    assert!(matches!(dormant_account(&disabled, now, &policy), Cow::Borrowed(_)));
  }

  #[test]
  fn test_stale_patch_revokes_compliance() {
    let now = Utc::now();
    let policy = AccessConfig::default();
    let device = Device {
      id: "d-1".to_string(),
      last_patched: now - Duration::days(45),
      ..Device::default()
    };

    let revoked = stale_patch(&device, now, &policy).into_owned();
    assert!(!revoked.compliant);
    assert_eq!(revoked.findings, vec![PATCH_WINDOW_FINDING]);
    assert!(matches!(stale_patch(&revoked, now, &policy), Cow::Borrowed(_)));
  }

  #[test]
  fn test_patched_device_untouched() {
    let now = Utc::now();
    let device = Device {
      last_patched: now - Duration::days(2),
      ..Device::default()
    };
    assert!(matches!(
      stale_patch(&device, now, &AccessConfig::default()),
      Cow::Borrowed(_)
    ));
  }
}
