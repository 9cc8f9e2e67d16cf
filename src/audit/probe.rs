//! Safe UI probing.
//!
//! An opt-in pass that clicks a handful of visible, non-destructive
//! elements to see whether basic interactions break. Candidates are
//! collected in-page, filtered conservatively here, and at most three are
//! exercised. Every failure is swallowed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use super::preview::PreviewSampler;
use crate::sanitize::netloc;

const MAX_ACTIONS: usize = 3;
const CLICK_SETTLE: Duration = Duration::from_millis(300);
const READY_STATE_BUDGET: Duration = Duration::from_millis(2500);
const NETWORK_IDLE_BUDGET: Duration = Duration::from_secs(3);
const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);

/// Verbs that suggest a click could mutate state. Anything matching is
/// never clicked.
static UNSAFE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(delete|remove|logout|sign\s*out|pay|submit|confirm|purchase|cancel|destroy|clear|reset)\b",
    )
    .expect("destructive-verb regex")
});

/// Collects visible links and button-like elements, de-duplicated by
/// (kind, text, href), capped at 60.
const CANDIDATES_SCRIPT: &str = r#"
    (() => {
      const out = [];
      const isVisible = (el) => {
        const r = el.getBoundingClientRect();
        const s = window.getComputedStyle(el);
        return r.width > 2 && r.height > 2 && s.visibility !== 'hidden' && s.display !== 'none' && s.opacity !== '0';
      };

      const pushEl = (el, kind) => {
        if (!el || !isVisible(el)) return;
        const text = (el.innerText || el.getAttribute('aria-label') || el.getAttribute('title') || '').trim().slice(0, 80);
        const href = kind === 'link' ? (el.href || '') : '';
        const type = kind === 'button' ? (el.getAttribute('type') || '').toLowerCase() : '';
        const inForm = !!el.closest('form');
        out.push({ kind, text, href, type, inForm });
      };

      document.querySelectorAll('a[href]').forEach(a => pushEl(a, 'link'));
      document.querySelectorAll('button, [role="button"]').forEach(b => pushEl(b, 'button'));

      const seen = new Set();
      return out.filter(x => {
        const k = `${x.kind}|${x.text}|${x.href}`;
        if (seen.has(k)) return false;
        seen.add(k);
        return true;
      }).slice(0, 60);
    })()
"#;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct Candidate {
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: String,
    #[serde(default, rename = "type")]
    pub button_type: String,
    #[serde(default, rename = "inForm")]
    pub in_form: bool,
}

/// Drop every candidate that could be destructive, lives in a form, is a
/// submit/reset button, points off-domain, or uses a non-http scheme.
pub(crate) fn filter_candidates(
    candidates: Vec<Candidate>,
    base_netloc: &str,
    max_actions: usize,
) -> Vec<Candidate> {
    let mut actions = Vec::new();
    for candidate in candidates {
        if actions.len() >= max_actions {
            break;
        }

        let text = candidate.text.trim();
        let href = candidate.href.trim();
        if text.is_empty() && href.is_empty() {
            continue;
        }
        if UNSAFE_REGEX.is_match(text) {
            continue;
        }
        if candidate.in_form {
            continue;
        }
        if candidate.kind == "button"
            && matches!(candidate.button_type.as_str(), "submit" | "reset")
        {
            continue;
        }
        if candidate.kind == "link" {
            if href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("javascript:")
            {
                continue;
            }
            match Url::parse(href) {
                Ok(parsed) => {
                    if parsed.has_host() && netloc(&parsed) != base_netloc {
                        continue;
                    }
                }
                Err(_) if !href.is_empty() => continue,
                Err(_) => {}
            }
        }

        actions.push(candidate);
    }
    actions
}

/// Run the probe on the current page. Returns the summary note, or `None`
/// when nothing was clicked or anything went wrong.
pub async fn probe_safe_interactions(
    page: &Page,
    base_netloc: &str,
    preview: &Arc<PreviewSampler>,
    in_flight: &Arc<AtomicI64>,
) -> Option<String> {
    let candidates: Vec<Candidate> = page
        .evaluate(CANDIDATES_SCRIPT)
        .await
        .ok()?
        .into_value()
        .ok()?;
    let actions = filter_candidates(candidates, base_netloc, MAX_ACTIONS);
    if actions.is_empty() {
        return None;
    }

    let started_url = current_url(page).await?;
    let mut clicks = 0u32;
    let mut navs = 0u32;
    let mut slow_or_loader = 0u32;

    for action in actions {
        let before = current_url(page).await.unwrap_or_default();

        if !click_candidate(page, &action).await {
            continue;
        }

        wait_for_ready_state(page, READY_STATE_BUDGET).await;
        if !wait_for_network_idle(in_flight, NETWORK_IDLE_BUDGET).await {
            slow_or_loader += 1;
        }

        let after = current_url(page).await.unwrap_or_default();
        clicks += 1;
        if after != before {
            navs += 1;
        }

        preview.capture().await;

        if after != before {
            let _ = page.evaluate("history.back()").await;
            wait_for_ready_state(page, READY_STATE_BUDGET).await;
        }

        tokio::time::sleep(CLICK_SETTLE).await;
    }

    if clicks == 0 {
        return None;
    }

    // Return to the page under audit if the batch drifted away.
    if let Some(now) = current_url(page).await {
        if now != started_url {
            let _ = tokio::time::timeout(Duration::from_secs(4), page.goto(started_url.as_str()))
                .await;
            wait_for_ready_state(page, READY_STATE_BUDGET).await;
        }
    }

    let mut parts = vec![format!("UI probe: {clicks} clicks")];
    if navs > 0 {
        parts.push(format!("{navs} nav"));
    }
    if slow_or_loader > 0 {
        parts.push(format!("{slow_or_loader} slow/loader"));
    }
    Some(parts.join(" | "))
}

async fn current_url(page: &Page) -> Option<String> {
    page.url().await.ok().flatten()
}

async fn click_candidate(page: &Page, action: &Candidate) -> bool {
    let script = if action.kind == "link" && !action.href.is_empty() {
        let href = serde_json::to_string(&action.href).unwrap_or_default();
        format!(
            "(() => {{ const el = Array.from(document.querySelectorAll('a[href]')).find(a => a.href === {href}); if (el) {{ el.click(); return true; }} return false; }})()"
        )
    } else {
        let text = action.text.replace('\n', " ");
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let needle = serde_json::to_string(text).unwrap_or_default();
        format!(
            "(() => {{ const els = document.querySelectorAll('button, [role=\"button\"], a[href]'); for (const el of els) {{ const t = (el.innerText || el.getAttribute('aria-label') || '').trim(); if (t.includes({needle})) {{ el.click(); return true; }} }} return false; }})()"
        )
    };

    match page.evaluate(script).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}

/// Poll until the document leaves the `loading` state. Evaluation errors
/// (mid-navigation) just mean "try again".
async fn wait_for_ready_state(page: &Page, budget: Duration) {
    let start = Instant::now();
    while start.elapsed() < budget {
        if let Ok(result) = page.evaluate("document.readyState").await {
            if let Ok(state) = result.into_value::<String>() {
                if state != "loading" {
                    return;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for the in-flight request counter to stay at zero for a quiet
/// period. Returns false when the budget runs out first.
async fn wait_for_network_idle(in_flight: &Arc<AtomicI64>, budget: Duration) -> bool {
    let start = Instant::now();
    let mut quiet_since: Option<Instant> = None;
    while start.elapsed() < budget {
        if in_flight.load(Ordering::Relaxed) <= 0 {
            let since = quiet_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= NETWORK_IDLE_QUIET {
                return true;
            }
        } else {
            quiet_since = None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(text: &str, href: &str) -> Candidate {
        Candidate {
            kind: "link".to_string(),
            text: text.to_string(),
            href: href.to_string(),
            button_type: String::new(),
            in_form: false,
        }
    }

    fn button(text: &str, button_type: &str, in_form: bool) -> Candidate {
        Candidate {
            kind: "button".to_string(),
            text: text.to_string(),
            href: String::new(),
            button_type: button_type.to_string(),
            in_form,
        }
    }

    #[test]
    fn destructive_text_is_excluded() {
        for text in [
            "Delete account",
            "Remove item",
            "Logout",
            "Sign out",
            "sign  out",
            "Pay now",
            "Confirm order",
            "Reset",
        ] {
            let kept = filter_candidates(vec![button(text, "", false)], "example.test", 3);
            assert!(kept.is_empty(), "{text} should be excluded");
        }
    }

    #[test]
    fn destructive_verbs_match_whole_words_only() {
        let kept = filter_candidates(
            vec![link("Clearance sale", "https://example.test/sale")],
            "example.test",
            3,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn form_members_and_submit_buttons_are_excluded() {
        let kept = filter_candidates(
            vec![
                button("Next page", "", true),
                button("Go", "submit", false),
                button("Wipe", "reset", false),
                button("Open menu", "button", false),
            ],
            "example.test",
            3,
        );
        assert_eq!(kept, vec![button("Open menu", "button", false)]);
    }

    #[test]
    fn non_http_and_cross_domain_links_are_excluded() {
        let kept = filter_candidates(
            vec![
                link("Mail us", "mailto:hi@example.test"),
                link("Call", "tel:+123"),
                link("Run", "javascript:void(0)"),
                link("Elsewhere", "https://other.test/page"),
                link("Docs", "https://example.test/docs"),
            ],
            "example.test",
            3,
        );
        assert_eq!(kept, vec![link("Docs", "https://example.test/docs")]);
    }

    #[test]
    fn at_most_three_actions_survive() {
        let candidates = (0..10)
            .map(|i| link(&format!("Page {i}"), &format!("https://example.test/{i}")))
            .collect();
        let kept = filter_candidates(candidates, "example.test", MAX_ACTIONS);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn blank_candidates_are_skipped() {
        let kept = filter_candidates(vec![button("", "", false)], "example.test", 3);
        assert!(kept.is_empty());
    }
}
