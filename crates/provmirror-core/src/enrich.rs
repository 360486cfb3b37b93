// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity enrichment.
//!
//! Resolves the requester against the internal corporate directory or the
//! federated identity source, then links the resulting profile into the
//! reporting store: manager row, chargeback-roster hit, and the student row
//! itself. The directory is an injected capability; this module owns only
//! the routing and linking rules.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::persistence::{ManagerRow, Persistence, StudentRow};
use crate::sources::{DirectorySource, DirectoryUser};

/// Company affiliation for corporate accounts.
pub const COMPANY_ID_CORP: i32 = 16736;
/// Company affiliation for IBM accounts.
pub const COMPANY_ID_IBM: i32 = 13716;
/// Company affiliation for everyone else.
pub const COMPANY_ID_PARTNER: i32 = 10000;

/// Cost center recorded for the automation service account.
const SERVICE_ACCOUNT_COST_CENTER: i32 = 99999;

/// Shared service mailbox: a roster walk ending here yields no chargeback.
const SHARED_SERVICE_MAILBOX: &str = "gpte@redhat.com";

/// Accounts excluded from ordinary reporting when they appear as the user
/// or the user's manager.
const EXCLUDED_MANAGER_EMAILS: &[&str] = &[
    "sborenst@redhat.com",
    "oczernin@redhat.com",
    "nalentor@redhat.com",
    "jenkins.sfo01@redhat.com",
    "jenkins.sfo01@gmail.com",
    "brezhnev@redhat.com",
];

/// Mail alias suffixes used for shared/service mailboxes, stripped before
/// directory lookups.
const ALIAS_SUFFIXES: &[&str] = &["+generic", "+shared", "+test"];

/// Account classification, gating which defaults are forced versus looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountClass {
    /// Ordinary user.
    Regular,
    /// The automation service account.
    ServiceAccount,
    /// Internal account excluded from ordinary reporting.
    Excluded,
}

impl AccountClass {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::ServiceAccount => "poolboy",
            Self::Excluded => "excluded",
        }
    }
}

/// Strip shared-mailbox alias markers from an address:
/// `jdoe+shared@corp` → `jdoe@corp`.
pub fn normalize_alias(email: &str) -> String {
    for suffix in ALIAS_SUFFIXES {
        if email.contains(suffix) {
            return email.replacen(suffix, "", 1);
        }
    }
    email.to_string()
}

/// Constructed fallback address: first initial of the given name plus the
/// first eight characters of the surname, at the corp domain.
pub fn constructed_email(given_name: &str, surname: &str, corp_domain: &str) -> String {
    let initial: String = given_name.to_lowercase().chars().take(1).collect();
    let last8: String = surname.to_lowercase().chars().take(8).collect();
    format!("{}{}@{}", initial, last8, corp_domain)
}

fn cap_first(s: &str) -> String {
    let trimmed = s.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Links resolved for one requester, ready to hang off the provision row.
#[derive(Debug, Clone, Default)]
pub struct UserLinks {
    /// Student row reference.
    pub user_id: Option<i64>,
    /// Manager row reference.
    pub manager_id: Option<i64>,
    /// Chargeback-roster reference.
    pub manager_chargeback_id: Option<i64>,
    /// Requester's cost center.
    pub cost_center: Option<i32>,
    /// Requester's geography.
    pub geo: Option<String>,
}

/// Identity resolution over an injected directory capability.
pub struct Enricher {
    directory: Arc<dyn DirectorySource>,
    corp_domain: String,
}

impl Enricher {
    /// Create an enricher over the given directory source.
    pub fn new(directory: Arc<dyn DirectorySource>, corp_domain: impl Into<String>) -> Self {
        Self {
            directory,
            corp_domain: corp_domain.into(),
        }
    }

    fn corp_marker(&self) -> String {
        let head = self.corp_domain.split('.').next().unwrap_or_default();
        format!("@{}", head)
    }

    fn is_corp_mail(&self, mail: &str) -> bool {
        mail.contains(&format!("@{}", self.corp_domain))
    }

    /// Route the requester identifier to the right identity source.
    ///
    /// Corporate identifiers that are not notifier identities go to the
    /// internal directory; everything else goes to the federated source, by
    /// mail when the identifier is itself an email signaled as a notifier
    /// identity, by uid otherwise.
    pub async fn lookup(
        &self,
        requester: &str,
        notifier: bool,
    ) -> Result<Option<DirectoryUser>> {
        if requester.contains(&self.corp_marker()) && !notifier {
            info!(requester, "Searching internal directory");
            self.directory.search_internal(requester).await
        } else if notifier && requester.contains('@') {
            info!(requester, "Searching federated identity by mail");
            self.directory.search_federated_mail(requester).await
        } else {
            info!(requester, "Searching federated identity by uid");
            self.directory.search_federated_uid(requester).await
        }
    }

    /// Link a resolved profile into the reporting store.
    ///
    /// A profile without a mail address yields empty links: the provision is
    /// recorded, just without user attribution. Corporate addresses get the
    /// deep treatment: alias normalization, constructed-address retry,
    /// manager resolution, and the chargeback-roster walk.
    pub async fn link_user(
        &self,
        persistence: &dyn Persistence,
        profile: Option<DirectoryUser>,
    ) -> Result<UserLinks> {
        let profile = profile.unwrap_or_default();
        let mail = match &profile.mail {
            Some(mail) => mail.to_lowercase(),
            None => return Ok(UserLinks::default()),
        };

        let first_name = cap_first(profile.given_name.as_deref().unwrap_or("default"));
        let last_name = cap_first(profile.surname.as_deref().unwrap_or("default"));

        let mut row = StudentRow {
            email: mail.clone(),
            full_name: format!("{} {}", first_name, last_name),
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            username: profile.uid.clone(),
            title: profile.title.clone(),
            directory_uid: profile.uid.clone(),
            geo: profile.geo.clone().unwrap_or_else(|| "NA".to_string()),
            user_category: AccountClass::Regular.as_str().to_string(),
            ..Default::default()
        };

        let mut manager_id = None;
        let mut manager_chargeback_id = None;

        if self.is_corp_mail(&mail) {
            row.partner = "redhat".to_string();
            row.company_id = COMPANY_ID_CORP;

            let internal = self
                .resolve_internal(&mail, &first_name, &last_name)
                .await?;
            let resolved = internal.unwrap_or(profile);

            row.cost_center = resolved.cost_center;
            row.directory_uid = resolved.uid.clone();
            row.username = resolved.uid.clone();
            row.title = resolved.title.clone();
            if let Some(geo) = &resolved.geo {
                row.geo = geo.clone();
            }

            if let Some(manager) = &resolved.manager {
                row.manager = manager.name.clone();
                row.manager_email = manager.mail.clone();
                if let Some(manager_mail) = &manager.mail {
                    let id = persistence
                        .upsert_manager(&ManagerRow {
                            name: manager.name.clone(),
                            email: manager_mail.clone(),
                            directory_uid: manager.uid.clone(),
                        })
                        .await?;
                    manager_id = Some(id);
                }
            }

            manager_chargeback_id = self.resolve_chargeback(persistence, &mail).await?;
        } else if mail.contains("poolboy") {
            row.partner = "redhat".to_string();
            row.company_id = COMPANY_ID_CORP;
            row.cost_center = Some(SERVICE_ACCOUNT_COST_CENTER);
            row.user_category = AccountClass::ServiceAccount.as_str().to_string();
        } else if mail.contains("ibm.com") {
            row.partner = "IBM".to_string();
            row.company_id = COMPANY_ID_IBM;
            row.cost_center = None;
            row.directory_uid = None;
            row.manager = None;
            row.manager_email = None;
        } else {
            row.partner = "partner".to_string();
            row.company_id = COMPANY_ID_PARTNER;
            row.directory_uid = None;
            row.manager = None;
            row.manager_email = None;
        }

        let excluded = |address: &str| EXCLUDED_MANAGER_EMAILS.contains(&address);
        if excluded(&mail) || row.manager_email.as_deref().is_some_and(excluded) {
            row.user_category = AccountClass::Excluded.as_str().to_string();
        }

        let student = persistence.upsert_student(&row).await?;

        Ok(UserLinks {
            user_id: Some(student.id),
            manager_id,
            manager_chargeback_id,
            cost_center: row.cost_center,
            geo: Some(row.geo),
        })
    }

    /// Deep internal lookup with alias normalization and the
    /// constructed-address retry.
    async fn resolve_internal(
        &self,
        mail: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<DirectoryUser>> {
        let generic = normalize_alias(mail);
        let mut resolved = self.directory.search_internal(&generic).await?;

        if resolved.is_none() {
            let fallback = constructed_email(first_name, last_name, &self.corp_domain);
            info!(mail = %generic, %fallback, "Directory miss, retrying with constructed address");
            resolved = self.directory.search_internal(&fallback).await?;
        }

        if resolved.is_none() {
            warn!(mail, "Internal directory lookup returned nothing");
        }

        Ok(resolved)
    }

    /// Walk the management chain against the chargeback roster. A hit on the
    /// shared service mailbox does not produce a chargeback.
    async fn resolve_chargeback(
        &self,
        persistence: &dyn Persistence,
        mail: &str,
    ) -> Result<Option<i64>> {
        let roster = persistence.chargeback_roster().await?;
        if roster.is_empty() {
            return Ok(None);
        }

        let generic = normalize_alias(mail);
        let hit = self.directory.roster_manager(&generic, &roster).await?;

        Ok(hit
            .filter(|address| address != SHARED_SERVICE_MAILBOX)
            .and_then(|address| roster.get(&address).copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalization() {
        assert_eq!(normalize_alias("jdoe+shared@redhat.com"), "jdoe@redhat.com");
        assert_eq!(normalize_alias("jdoe+generic@redhat.com"), "jdoe@redhat.com");
        assert_eq!(normalize_alias("jdoe+test@redhat.com"), "jdoe@redhat.com");
        assert_eq!(normalize_alias("jdoe@redhat.com"), "jdoe@redhat.com");
    }

    #[test]
    fn test_constructed_email() {
        assert_eq!(
            constructed_email("Jane", "Vandermonde", "redhat.com"),
            "jvandermo@redhat.com"
        );
        assert_eq!(constructed_email("Bo", "Li", "redhat.com"), "bli@redhat.com");
    }

    #[test]
    fn test_account_class_tags() {
        assert_eq!(AccountClass::Regular.as_str(), "regular");
        assert_eq!(AccountClass::ServiceAccount.as_str(), "poolboy");
        assert_eq!(AccountClass::Excluded.as_str(), "excluded");
    }

    #[test]
    fn test_cap_first() {
        assert_eq!(cap_first("jane "), "Jane");
        assert_eq!(cap_first(""), "");
        assert_eq!(cap_first("o'neil"), "O'neil");
    }
}
