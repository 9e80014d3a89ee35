//! Local approximations of the remote analysis operations.
//!
//! Every function here is pure and returns the same shape as its remote
//! counterpart.

use chrono::{DateTime, Utc};

use crate::config::AccessConfig;
use crate::model::{Case, Device, Priority, Severity, Threat, ThreatStatus};
use crate::remote::{CampaignRisk, ComplianceVerdict, PlaybookSuggestion};
use crate::rules::dormancy::{self, PATCH_WINDOW_FINDING};

pub const HIGH_LOAD_FINDING: &str = "sustained-high-load";
pub const SLOW_LINK_FINDING: &str = "degraded-connectivity";

const HIGH_LOAD_PERCENT: f32 = 90.0;
const SLOW_LINK_MS: u32 = 1_000;

/// Compliance from patch age and telemetry.
pub fn compliance(device: &Device, now: DateTime<Utc>, policy: &AccessConfig) -> ComplianceVerdict {
  let patch_age_days = (now - device.last_patched).num_days().max(0);
  let mut findings: Vec<String> = device
    .findings
    .iter()
    .filter(|f| f.as_str() != HIGH_LOAD_FINDING && f.as_str() != SLOW_LINK_FINDING)
    .cloned()
    .collect();

  let patch_overdue = dormancy::patch_overdue(device, now, policy);
  if patch_overdue && !findings.iter().any(|f| f == PATCH_WINDOW_FINDING) {
    findings.push(PATCH_WINDOW_FINDING.to_string());
  }
  if device.cpu_load >= HIGH_LOAD_PERCENT {
    findings.push(HIGH_LOAD_FINDING.to_string());
  }
  if device.latency_ms >= SLOW_LINK_MS {
    findings.push(SLOW_LINK_FINDING.to_string());
  }

  let age_risk = (patch_age_days * 2).min(60) as u32;
  let finding_risk = 15 * findings.len() as u32;
  let risk_score = (age_risk + finding_risk).min(100) as u8;

  ComplianceVerdict {
    compliant: device.compliant && !patch_overdue,
    risk_score,
    findings,
  }
}

const KEYWORD_PLAYBOOKS: &[(&[&str], &str)] = &[
  (&["phish", "spoof"], "phishing-response"),
  (&["ransom", "encrypt"], "ransomware-containment"),
  (&["malware", "trojan", "beacon"], "malware-eradication"),
  (&["login", "credential", "brute", "password"], "account-compromise"),
  (&["exfil", "leak"], "data-exfiltration"),
];

fn playbook_steps(playbook: &str) -> &'static [&'static str] {
  match playbook {
    "phishing-response" => &["quarantine message", "reset exposed credentials", "block sender domain"],
    "ransomware-containment" => &["isolate affected hosts", "disable shared drives", "restore from backup"],
    "malware-eradication" => &["isolate host", "collect forensic image", "reimage and patch"],
    "account-compromise" => &["force password reset", "revoke sessions", "enforce mfa"],
    "data-exfiltration" => &["block egress destination", "preserve logs", "notify data owner"],
    "incident-escalation" => &["page on-call lead", "open bridge", "assign incident commander"],
    _ => &["validate alert", "gather context", "assign analyst"],
  }
}

/// Playbook from title keywords, else from priority.
pub fn playbook(case: &Case) -> PlaybookSuggestion {
  let title = case.title.to_lowercase();
  let playbook = KEYWORD_PLAYBOOKS
    .iter()
    .find(|(keywords, _)| keywords.iter().any(|k| title.contains(k)))
    .map(|(_, playbook)| *playbook)
    .unwrap_or(match case.priority {
      Priority::Critical | Priority::High => "incident-escalation",
      Priority::Medium | Priority::Low => "standard-triage",
    });

  PlaybookSuggestion {
    playbook: playbook.to_string(),
    steps: playbook_steps(playbook).iter().map(|s| s.to_string()).collect(),
  }
}

/// Confidence-weighted severity mean over open threats, scaled to 0..=100.
pub fn campaign_risk(threats: &[Threat]) -> CampaignRisk {
  let open: Vec<&Threat> = threats.iter().filter(|t| t.status != ThreatStatus::Closed).collect();
  if open.is_empty() {
    return CampaignRisk {
      score: 0,
      level: Severity::Low,
      contributing: 0,
    };
  }

  let max_weight = Severity::Critical.weight();
  let weighted: u32 = open
    .iter()
    .map(|t| u32::from(t.confidence) * t.severity.weight())
    .sum();
  let score = (weighted / (open.len() as u32 * max_weight)).min(100) as u8;

  CampaignRisk {
    score,
    level: level_for(score),
    contributing: open.len() as u32,
  }
}

fn level_for(score: u8) -> Severity {
  match score {
    75.. => Severity::Critical,
    50..=74 => Severity::High,
    25..=49 => Severity::Medium,
    _ => Severity::Low,
  }
}
