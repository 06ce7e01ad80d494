//! The isolated script runtime plugin rules run in.
//!
//! Scripts are minijinja templates and expressions. The environment has no
//! loader configured, so a script can't reach the filesystem; the only host
//! state it sees is the capability table registered in [`Sandbox::new`].

use std::sync::Arc;
use std::time::Duration;

use minijinja::{context, value::Value, AutoEscape, Environment, Error as MJError, ErrorKind};
use regex::RegexBuilder;

use super::helpers::{avatar_img, format_username};
use super::options::{OptionBundle, Paths};
use super::registry::RuleModule;
use super::Translations;
use crate::common::{Host, SCRIPT_LOG_PREFIX};
use crate::error::EngineError;
use crate::prelude::*;

/// Upper bound on the compiled size of a script-supplied regex.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

const DEFAULT_AVATAR_SIZE: u32 = 24;

pub struct Sandbox {
    env: Environment<'static>,
    budget: Duration,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    pub fn new(
        host: Arc<dyn Host>,
        translations: Arc<Translations>,
        paths: Paths,
        fuel: u64,
        budget: Duration,
    ) -> Self {
        let mut env = Environment::new();
        env.set_fuel(Some(fuel));
        // Scripts produce markup; escaping is the sanitizer's job.
        env.set_auto_escape_callback(|_| AutoEscape::None);

        register_capabilities(&mut env, host, translations, paths);

        Self { env, budget }
    }

    /// Compiles a plugin module. A syntax error here is fatal for the context.
    pub fn load(&mut self, module: &RuleModule) -> Result<(), EngineError> {
        self.env
            .add_template_owned(module.template_name(), module.source.clone())
            .map_err(|source| EngineError::Load {
                module: module.name.clone(),
                source,
            })
    }

    /// Runs a loaded module over `source`, returning its replacement.
    pub fn run_rule(
        &self,
        module: &RuleModule,
        source: &str,
        bundle: &OptionBundle,
    ) -> Result<String, EngineError> {
        let classify = |e| EngineError::from_script(&module.name, e, self.budget);

        let template = self.env.get_template(&module.template_name()).map_err(classify)?;
        template
            .render(context! {
                source => source,
                options => Value::from_serialize(bundle),
            })
            .map_err(classify)
    }

    /// Evaluates a free-standing expression with `vars` in scope.
    pub fn execute(&self, script: &str, vars: Value) -> Result<Value, EngineError> {
        let classify = |e: MJError| match e.kind() {
            ErrorKind::OutOfFuel => EngineError::Timeout { budget: self.budget },
            _ => EngineError::Execution(e),
        };

        let expression = self.env.compile_expression(script).map_err(classify)?;
        expression.eval(vars).map_err(classify)
    }
}

fn register_capabilities(
    env: &mut Environment<'static>,
    host: Arc<dyn Host>,
    translations: Arc<Translations>,
    paths: Paths,
) {
    env.add_function("log_info", |message: String| {
        info!("{SCRIPT_LOG_PREFIX}{message}");
        String::new()
    });
    env.add_function("log_warn", |message: String| {
        warn!("{SCRIPT_LOG_PREFIX}{message}");
        String::new()
    });
    env.add_function("log_error", |message: String| {
        error!("{SCRIPT_LOG_PREFIX}{message}");
        String::new()
    });

    let h = Arc::clone(&host);
    env.add_function("lookup_avatar", move |username: String| {
        Value::from_serialize(&h.lookup_avatar(&username))
    });

    env.add_function("avatar_img", move |template: String, size: Option<u32>| {
        Value::from_safe_string(avatar_img(&template, size.unwrap_or(DEFAULT_AVATAR_SIZE), &paths))
    });

    let h = Arc::clone(&host);
    env.add_function("topic_info", move |topic_id: u64| {
        Value::from_serialize(&h.topic_info(topic_id))
    });

    let h = Arc::clone(&host);
    env.add_function("current_user", move |user_id: u64| {
        Value::from_serialize(&h.current_user(user_id))
    });

    let h = Arc::clone(&host);
    env.add_function("lookup_upload_urls", move |identifiers: Vec<String>| {
        Value::from_serialize(&h.lookup_upload_urls(&identifiers))
    });

    let h = host;
    env.add_function("hashtag_lookup", move |slug: String, types: Vec<String>| {
        Value::from_serialize(&h.hashtag_lookup(&slug, &types))
    });

    env.add_function("format_username", |username: String| format_username(&username));

    env.add_function("translate", move |key: String| translations.get(&key));

    env.add_filter("regex_replace", regex_replace);
}

fn regex_replace(value: String, pattern: String, replacement: String) -> Result<String, MJError> {
    let regex = RegexBuilder::new(&pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| {
            MJError::new(ErrorKind::InvalidOperation, format!("invalid pattern {pattern:?}"))
                .with_source(e)
        })?;

    Ok(regex.replace_all(&value, replacement.as_str()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Directory, NullHost, SiteSettings, StaticHost, TopicInfo};
    use crate::engine::registry::Phase;

    fn sandbox(host: Arc<dyn Host>, fuel: u64) -> Sandbox {
        let translations = Arc::new(Translations::new(Arc::clone(&host)));
        let paths = Paths::from_settings(&SiteSettings::default());
        Sandbox::new(host, translations, paths, fuel, Duration::from_secs(1))
    }

    #[test]
    fn expressions() {
        let sandbox = sandbox(Arc::new(NullHost), 10_000);

        let value = sandbox.execute("a + b", context! { a => 1, b => 2 }).unwrap();
        assert_eq!(value, Value::from(3));

        let value = sandbox
            .execute("'a-b-c' | regex_replace('-', '+')", context! {})
            .unwrap();
        assert_eq!(value.as_str(), Some("a+b+c"));

        let value = sandbox.execute("translate('missing.key')", context! {}).unwrap();
        assert_eq!(value.as_str(), Some("missing.key"));
    }

    #[test]
    fn host_capabilities() {
        let host = StaticHost::new(Directory {
            topics: vec![TopicInfo { id: 9, title: "Nine".into(), slug: None }],
            ..Directory::default()
        });
        let sandbox = sandbox(Arc::new(host), 10_000);

        let value = sandbox.execute("topic_info(9).title", context! {}).unwrap();
        assert_eq!(value.as_str(), Some("Nine"));

        let value = sandbox.execute("topic_info(10) is none", context! {}).unwrap();
        assert!(value.is_true());
    }

    #[test]
    fn errors() {
        let sandbox = sandbox(Arc::new(NullHost), 10_000);

        let err = sandbox.execute("1 +", context! {}).unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));

        let err = sandbox.execute("'x' | regex_replace('(', '')", context! {}).unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }

    #[test]
    fn fuel_exhaustion() {
        let mut sandbox = sandbox(Arc::new(NullHost), 100);
        let module = RuleModule::new(
            "spin",
            Phase::Text,
            "{% for i in range(5000) %}{{ i }}{% endfor %}",
        );
        sandbox.load(&module).unwrap();

        let bundle = crate::engine::test_support::bundle();
        let err = sandbox.run_rule(&module, "x", &bundle).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[test]
    fn load_errors() {
        let mut sandbox = sandbox(Arc::new(NullHost), 100);
        let module = RuleModule::new("broken", Phase::Html, "{% if %}");

        let err = sandbox.load(&module).unwrap_err();
        assert!(matches!(err, EngineError::Load { module, .. } if module == "broken"));
    }
}
