//! Init scripts registered with `Page.addScriptToEvaluateOnNewDocument`.

use serde::{Deserialize, Serialize};

use crate::config::Viewport;

/// Which navigator/window patches a profile installs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSet {
    pub webdriver: bool,
    pub chrome_runtime: bool,
    pub languages: bool,
    pub plugins: bool,
    pub permissions: bool,
    pub outer_dimensions: bool,
    pub canvas_noise: bool,
}

impl Default for PatchSet {
    fn default() -> Self {
        Self {
            webdriver: true,
            chrome_runtime: true,
            languages: true,
            plugins: true,
            permissions: true,
            outer_dimensions: true,
            canvas_noise: true,
        }
    }
}

const WEBDRIVER: &str = r#"Object.defineProperty(Navigator.prototype, 'webdriver', { get: () => undefined });"#;

const CHROME_RUNTIME: &str = r#"if (!window.chrome) { window.chrome = {}; }
if (!window.chrome.runtime) { window.chrome.runtime = {}; }"#;

const PLUGINS: &str = r#"Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });"#;

const PERMISSIONS: &str = r#"(() => {
  if (!window.navigator.permissions) return;
  const originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
  window.navigator.permissions.query = (parameters) => (
    parameters && parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters)
  );
})();"#;

const CANVAS_NOISE: &str = r#"(() => {
  const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
  Object.defineProperty(HTMLCanvasElement.prototype, 'toDataURL', {
    value: function () {
      const dataUrl = originalToDataURL.apply(this, arguments);
      return dataUrl.length < 10 ? dataUrl : dataUrl.replace(/.$/, String(Math.floor(Math.random() * 10)));
    }
  });
})();"#;

/// Builds the scripts for a patch set, in install order.
pub fn init_scripts(
    patches: &PatchSet,
    languages: &[String],
    viewport: Option<Viewport>,
) -> Vec<String> {
    let mut scripts = Vec::new();
    if patches.webdriver {
        scripts.push(WEBDRIVER.to_string());
    }
    if patches.chrome_runtime {
        scripts.push(CHROME_RUNTIME.to_string());
    }
    if patches.languages && !languages.is_empty() {
        let list = serde_json::to_string(languages).unwrap_or_else(|_| "['en-US','en']".into());
        scripts.push(format!(
            "Object.defineProperty(navigator, 'languages', {{ get: () => {list} }});"
        ));
    }
    if patches.plugins {
        scripts.push(PLUGINS.to_string());
    }
    if patches.permissions {
        scripts.push(PERMISSIONS.to_string());
    }
    if patches.outer_dimensions {
        let (width, height) = viewport
            .map(|vp| (vp.width, vp.height))
            .unwrap_or((1920, 1080));
        scripts.push(format!(
            "Object.defineProperty(window, 'outerWidth', {{ get: () => {width} }});\n\
             Object.defineProperty(window, 'outerHeight', {{ get: () => {height} }});\n\
             Object.defineProperty(window, 'screenX', {{ get: () => 0 }});\n\
             Object.defineProperty(window, 'screenY', {{ get: () => 0 }});"
        ));
    }
    if patches.canvas_noise {
        scripts.push(CANVAS_NOISE.to_string());
    }
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_patch_set_emits_every_script() {
        let scripts = init_scripts(
            &PatchSet::default(),
            &["en-US".into(), "en".into()],
            Some(Viewport {
                width: 1396,
                height: 632,
            }),
        );
        assert_eq!(scripts.len(), 7);
        assert!(scripts[2].contains(r#"["en-US","en"]"#));
        assert!(scripts[5].contains("get: () => 1396"));
    }

    #[test]
    fn disabled_patches_are_skipped() {
        let patches = PatchSet {
            canvas_noise: false,
            languages: false,
            ..PatchSet::default()
        };
        let scripts = init_scripts(&patches, &["en".into()], None);
        assert_eq!(scripts.len(), 5);
        assert!(scripts.iter().all(|s| !s.contains("toDataURL")));
        assert!(scripts.iter().any(|s| s.contains("get: () => 1920")));
    }
}
