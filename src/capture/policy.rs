//! Page preparation scripts and the site adaptation policy.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ACCEPT_LANGUAGE;
use crate::matrix::Resolution;

/// Site-specific knowledge: which ephemeral UI to get rid of before a screenshot.
///
/// Loaded from the run config; the core never hard-codes selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagePolicy {
    /// Accept-Language header sent with every request
    pub accept_language: String,
    /// Elements forced to `display: none` through an injected stylesheet
    pub hide_selectors: Vec<String>,
    /// Elements removed from the DOM
    pub remove_selectors: Vec<String>,
    /// Dismiss buttons clicked when visible (e.g. an open menu's close button)
    pub click_selectors: Vec<String>,
    /// Body class that marks the page as still loading
    pub loading_class: Option<String>,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            hide_selectors: Vec::new(),
            remove_selectors: Vec::new(),
            click_selectors: Vec::new(),
            loading_class: Some("loading".to_string()),
        }
    }
}

impl PagePolicy {
    pub fn hide(mut self, selector: impl Into<String>) -> Self {
        self.hide_selectors.push(selector.into());
        self
    }

    pub fn remove(mut self, selector: impl Into<String>) -> Self {
        self.remove_selectors.push(selector.into());
        self
    }

    pub fn click(mut self, selector: impl Into<String>) -> Self {
        self.click_selectors.push(selector.into());
        self
    }

    /// Expression that idempotently dismisses, removes and hides the configured UI.
    ///
    /// Evaluates to the number of elements that were clicked or removed.
    pub fn hide_ui_script(&self) -> String {
        let click = js_string_array(&self.click_selectors);
        let remove = js_string_array(&self.remove_selectors);
        let hide_css = if self.hide_selectors.is_empty() {
            String::new()
        } else {
            format!(
                "{} {{ display: none !important; visibility: hidden !important; opacity: 0 !important; }}",
                self.hide_selectors.join(",\n")
            )
        };
        let hide_css = serde_json::Value::String(hide_css).to_string();

        format!(
            r#"(() => {{
  let touched = 0;
  for (const sel of {click}) {{
    const el = document.querySelector(sel);
    if (el && el.offsetParent !== null) {{ el.click(); touched++; }}
  }}
  for (const sel of {remove}) {{
    document.querySelectorAll(sel).forEach(el => {{ el.remove(); touched++; }});
  }}
  const css = {hide_css};
  if (css && !document.getElementById('__visreg_hide')) {{
    const style = document.createElement('style');
    style.id = '__visreg_hide';
    style.textContent = css;
    (document.head || document.documentElement).appendChild(style);
  }}
  return touched;
}})()"#
        )
    }

    /// Predicate for document readiness: `complete` and no loading class on `body`
    pub fn document_ready_script(&self) -> String {
        match &self.loading_class {
            Some(class) => format!(
                "document.readyState === 'complete' && !(document.body && document.body.classList.contains({}))",
                serde_json::Value::String(class.clone())
            ),
            None => "document.readyState === 'complete'".to_string(),
        }
    }
}

/// Predicate for near-network-idle: no unfinished resource fetch started within
/// the last `window_ms` milliseconds
pub fn network_idle_script(window_ms: u128) -> String {
    format!(
        "performance.getEntriesByType('resource').filter(r => !r.responseEnd && r.startTime > performance.now() - {}).length === 0",
        window_ms
    )
}

/// Stylesheet that pins layout to the viewport so responsive reflow cannot make
/// captures of the same page diverge
pub fn responsive_override_css(resolution: Resolution) -> String {
    format!(
        r#"* {{
  max-width: 100% !important;
  box-sizing: border-box !important;
}}
body {{
  width: {w}px !important;
  min-height: {h}px !important;
  margin: 0 !important;
  padding: 0 !important;
  overflow: hidden !important;
}}
img, video, iframe {{
  max-width: 100% !important;
  height: auto !important;
}}"#,
        w = resolution.width,
        h = resolution.height
    )
}

fn js_string_array(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_css_uses_resolution() {
        let css = responsive_override_css(Resolution::new(375, 667));
        assert!(css.contains("width: 375px !important"));
        assert!(css.contains("min-height: 667px !important"));
        assert!(css.contains("overflow: hidden !important"));
    }

    #[test]
    fn test_hide_script_embeds_selectors_as_json() {
        let policy = PagePolicy::default()
            .hide(".Menu_Root")
            .remove(".CookiePanel")
            .click("button[aria-label=\"close\"]");
        let script = policy.hide_ui_script();
        assert!(script.contains(r#"[".CookiePanel"]"#));
        assert!(script.contains(r#"["button[aria-label=\"close\"]"]"#));
        assert!(script.contains(".Menu_Root"));
        assert!(script.contains("display: none !important"));
    }

    #[test]
    fn test_empty_policy_script_is_a_noop() {
        let script = PagePolicy::default().hide_ui_script();
        assert!(script.contains("for (const sel of [])"));
        assert!(script.contains(r#"const css = "";"#));
    }

    #[test]
    fn test_document_ready_script() {
        let with_class = PagePolicy::default().document_ready_script();
        assert!(with_class.contains(r#"classList.contains("loading")"#));

        let policy = PagePolicy {
            loading_class: None,
            ..Default::default()
        };
        assert_eq!(policy.document_ready_script(), "document.readyState === 'complete'");
    }

    #[test]
    fn test_network_idle_script_window() {
        assert!(network_idle_script(1000).contains("performance.now() - 1000"));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: PagePolicy = serde_json::from_str(r#"{"hide_selectors": [".a"]}"#).unwrap();
        assert_eq!(policy.hide_selectors, vec![".a".to_string()]);
        assert_eq!(policy.accept_language, DEFAULT_ACCEPT_LANGUAGE);
        assert_eq!(policy.loading_class.as_deref(), Some("loading"));
    }
}
