//! Sandboxed template rendering.
//!
//! Templates live in a read-only directory configured at startup and are
//! rendered with a closed variable set: undefined variables are a hard
//! error, templates cannot touch the filesystem, and output is written
//! without HTML escaping since the target is nginx syntax.
//!
//! Rendering never suspends; it is pure CPU work over the loaded source.
use std::{collections::BTreeMap, path::PathBuf, sync::Mutex};

use minijinja::{Environment, UndefinedBehavior, value::Value};

use crate::core::error::{OpError, OpResult};

/// Constant exposed to every template as `template_revision`.
pub const TEMPLATE_REVISION: &str = "2026.2";

/// Template names the rest of the system references.
pub const REQUIRED_TEMPLATES: &[&str] = &[
    "subdomain",
    "subfolder",
    "mcp-subdomain",
    "mcp-subfolder",
    "mcp_location_block",
];

/// Variable bag passed into a render.
pub type TemplateVars = BTreeMap<String, Value>;

type VarsHook = Box<dyn Fn(&mut TemplateVars) + Send + Sync>;
type PreRenderHook = Box<dyn Fn(&str, &TemplateVars) + Send + Sync>;
type PostRenderHook = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    vars: Option<VarsHook>,
    pre_render: Option<PreRenderHook>,
    post_render: Option<PostRenderHook>,
}

/// Renders named templates from the configured directory.
pub struct TemplateManager {
    env: Environment<'static>,
    template_dir: PathBuf,
    // Testable hooks, installed by the orchestrator. Null in production.
    hooks: Mutex<Hooks>,
}

impl TemplateManager {
    /// Build the rendering environment over `template_dir`.
    ///
    /// A missing directory is a [`OpError::Template`] so a wrapping process
    /// can distinguish it from ordinary configuration problems.
    pub fn new(template_dir: impl Into<PathBuf>) -> OpResult<Self> {
        let template_dir = template_dir.into();
        if !template_dir.is_dir() {
            return Err(OpError::Template(format!(
                "template directory {} does not exist",
                template_dir.display()
            )));
        }

        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(&template_dir));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // nginx output, not HTML.
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        tracing::debug!(dir = %template_dir.display(), "template environment initialized");

        Ok(Self {
            env,
            template_dir,
            hooks: Mutex::new(Hooks::default()),
        })
    }

    pub fn template_dir(&self) -> &std::path::Path {
        &self.template_dir
    }

    /// Install testable hooks around rendering. Passing `None` leaves the
    /// corresponding hook unchanged; use [`clear_hooks`](Self::clear_hooks)
    /// to reset.
    pub fn set_hooks(
        &self,
        vars: Option<VarsHook>,
        pre_render: Option<PreRenderHook>,
        post_render: Option<PostRenderHook>,
    ) {
        let mut hooks = self.hooks.lock().expect("template hook lock poisoned");
        if vars.is_some() {
            hooks.vars = vars;
        }
        if pre_render.is_some() {
            hooks.pre_render = pre_render;
        }
        if post_render.is_some() {
            hooks.post_render = post_render;
        }
    }

    pub fn clear_hooks(&self) {
        *self.hooks.lock().expect("template hook lock poisoned") = Hooks::default();
    }

    /// Render a named template with the given variables.
    pub fn render(&self, name: &str, mut vars: TemplateVars) -> OpResult<String> {
        vars.insert(
            "template_revision".to_string(),
            Value::from(TEMPLATE_REVISION),
        );

        let hooks = self.hooks.lock().expect("template hook lock poisoned");
        if let Some(hook) = &hooks.vars {
            hook(&mut vars);
        }
        if let Some(hook) = &hooks.pre_render {
            hook(name, &vars);
        }

        let template = self
            .env
            .get_template(&template_file(name))
            .map_err(|e| OpError::Template(format!("template '{name}' not available: {e}")))?;
        let content = template
            .render(&vars)
            .map_err(|e| OpError::Template(format!("rendering '{name}' failed: {e}")))?;

        if let Some(hook) = &hooks.post_render {
            hook(name, &content);
        }

        Ok(content)
    }

    /// Whether a named template can be loaded.
    pub fn template_exists(&self, name: &str) -> bool {
        self.env.get_template(&template_file(name)).is_ok()
    }

    /// Check that every template the system references is present.
    pub fn verify_required(&self) -> Result<(), Vec<String>> {
        let missing: Vec<String> = REQUIRED_TEMPLATES
            .iter()
            .filter(|name| !self.template_exists(name))
            .map(|name| template_file(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

/// Map a template name to its on-disk filename.
fn template_file(name: &str) -> String {
    format!("{name}.conf.j2")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn manager_with(template: &str, body: &str) -> (TempDir, TemplateManager) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(template_file(template)), body).unwrap();
        let manager = TemplateManager::new(dir.path()).unwrap();
        (dir, manager)
    }

    fn vars(pairs: &[(&str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn renders_with_variables() {
        let (_dir, manager) = manager_with("subdomain", "app={{ upstream_app }} rev={{ template_revision }}");
        let out = manager
            .render("subdomain", vars(&[("upstream_app", "plex")]))
            .unwrap();
        assert_eq!(out, format!("app=plex rev={TEMPLATE_REVISION}"));
    }

    #[test]
    fn undefined_variable_is_a_hard_error() {
        let (_dir, manager) = manager_with("subdomain", "{{ not_defined }}");
        let err = manager.render("subdomain", TemplateVars::new()).unwrap_err();
        assert!(matches!(err, OpError::Template(_)));
    }

    #[test]
    fn missing_template_is_reported() {
        let (_dir, manager) = manager_with("subdomain", "ok");
        assert!(manager.template_exists("subdomain"));
        assert!(!manager.template_exists("subfolder"));
        assert!(matches!(
            manager.render("subfolder", TemplateVars::new()),
            Err(OpError::Template(_))
        ));
    }

    #[test]
    fn missing_directory_is_a_template_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(
            TemplateManager::new(&gone),
            Err(OpError::Template(_))
        ));
    }

    #[test]
    fn verify_required_lists_missing_templates() {
        let (_dir, manager) = manager_with("subdomain", "ok");
        let missing = manager.verify_required().unwrap_err();
        assert!(missing.contains(&"mcp_location_block.conf.j2".to_string()));
        assert!(!missing.contains(&"subdomain.conf.j2".to_string()));
    }

    #[test]
    fn hooks_observe_and_override() {
        let (_dir, manager) = manager_with("subdomain", "app={{ upstream_app }}");

        manager.set_hooks(
            Some(Box::new(|vars| {
                vars.insert("upstream_app".to_string(), Value::from("overridden"));
            })),
            None,
            Some(Box::new(|name, content| {
                assert_eq!(name, "subdomain");
                assert!(content.contains("overridden"));
            })),
        );

        let out = manager
            .render("subdomain", vars(&[("upstream_app", "plex")]))
            .unwrap();
        assert_eq!(out, "app=overridden");

        manager.clear_hooks();
        let out = manager
            .render("subdomain", vars(&[("upstream_app", "plex")]))
            .unwrap();
        assert_eq!(out, "app=plex");
    }

    #[test]
    fn no_escaping_of_nginx_syntax() {
        let (_dir, manager) = manager_with("subdomain", "header '{{ value }}'");
        let out = manager
            .render("subdomain", vars(&[("value", "h3=\":443\"; ma=86400")]))
            .unwrap();
        assert!(out.contains("h3=\":443\"; ma=86400"));
    }
}
