//! Integration tests for the Jinja plugin.
//!
//! Tests cover: the full install → register → render pipeline against the
//! templates in this directory, context layering, observers, template caching
//! and reloading, configuration from application settings, and concurrent
//! renders.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tmpl_rs_core::{Application, Settings, TmplError};
use tmpl_rs_jinja::context::context_from;
use tmpl_rs_jinja::{
    Context, JinjaPlugin, RenderRecorder, StringLoader, TemplateLoader, TemplateRef, Value,
};
use tmpl_rs_signals::ReceiverResult;

// ============================================================================
// Shared helpers
// ============================================================================

fn sum(a: i64, b: i64) -> i64 {
    a + b
}

fn floor_div(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

/// Returns `a` when `value` is truthy, otherwise `b`.
fn test(value: Value, a: Value, b: Option<Value>) -> Value {
    if value.is_true() {
        a
    } else {
        b.unwrap_or_default()
    }
}

fn app(name: &str) -> Application {
    Application::new(Settings::named(name))
}

/// Installs a plugin searching this directory, with the registrations every
/// scenario test relies on.
fn web_plugin(app: &Application) -> Arc<JinjaPlugin> {
    let jinja = app
        .install(Arc::new(
            JinjaPlugin::builder().template_folders(["tests"]).build(),
        ))
        .unwrap();

    jinja.add_context(|| context_from([("global", "done")]));
    jinja.add_global(sum).unwrap();
    jinja.global("div").register(floor_div).unwrap();
    jinja.add_filter(test).unwrap();
    jinja
}

fn memory_plugin(app: &Application, loader: Arc<StringLoader>, cache_size: usize) -> Arc<JinjaPlugin> {
    app.install(Arc::new(
        JinjaPlugin::builder()
            .loader(loader)
            .cache_size(cache_size)
            .build(),
    ))
    .unwrap()
}

// ============================================================================
// 1. Full pipeline
// ============================================================================

#[tokio::test]
async fn test_render_full_page() {
    let app = app("jinja2");
    let jinja = web_plugin(&app);

    let html = jinja
        .render("template.html", context_from([("name", "jinja2")]))
        .await
        .unwrap();

    assert!(html.contains("<h1>Hello jinja2!</h1>"));
    assert!(html.contains("<p>8</p>"));
    assert!(html.contains("<p>3</p>"));
    assert!(html.contains("<b>done</b>"));
    assert!(html.contains("<i>yes</i>"));
    assert!(html.contains("Application: jinja2"));
}

#[tokio::test]
async fn test_plugin_lookup_by_name() {
    let app = app("jinja2");
    web_plugin(&app);

    let jinja = app.plugin::<JinjaPlugin>("jinja").unwrap();
    assert_eq!(jinja.config().unwrap().template_folders, vec![PathBuf::from("tests")]);
    assert_eq!(jinja.render_str("OK", Context::new()).await.unwrap(), "OK");
}

#[tokio::test]
async fn test_template_inheritance() {
    let app = app("blog");
    let jinja = web_plugin(&app);

    let html = jinja
        .render("page.html", context_from([("items", vec!["a", "b"])]))
        .await
        .unwrap();
    assert!(html.contains("<title>blog</title>"));
    assert!(html.contains("<li>A</li><li>B</li>"));
}

#[tokio::test]
async fn test_unknown_template() {
    let app = app("jinja2");
    let jinja = web_plugin(&app);

    let err = jinja
        .render("unknown.html", Context::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TmplError::TemplateDoesNotExist(_)));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_inline_template() {
    let app = app("jinja2");
    let jinja = web_plugin(&app);

    let out = jinja
        .render(
            TemplateRef::inline("greeting", "{{ sum(1, 2) }} {{ global }}"),
            Context::new(),
        )
        .await
        .unwrap();
    assert_eq!(out, "3 done");
}

// ============================================================================
// 2. Lifecycle errors
// ============================================================================

#[tokio::test]
async fn test_uninstalled_plugin_rejects_everything() {
    let jinja = JinjaPlugin::new();

    assert!(matches!(
        jinja.add_global(sum),
        Err(TmplError::PluginNotInstalled(_))
    ));
    assert!(matches!(
        jinja.global("div").register(floor_div),
        Err(TmplError::PluginNotInstalled(_))
    ));
    assert!(matches!(
        jinja.add_global_value("x", 1),
        Err(TmplError::PluginNotInstalled(_))
    ));
    assert!(matches!(
        jinja.render("template.html", Context::new()).await,
        Err(TmplError::PluginNotInstalled(_))
    ));

    // Providers may be added before setup.
    jinja.add_context(Context::new);
    assert_eq!(jinja.provider_count(), 1);
}

#[test]
fn test_double_install() {
    let app = app("jinja2");
    let jinja = app.install(Arc::new(JinjaPlugin::new())).unwrap();

    assert!(matches!(
        app.install(Arc::clone(&jinja)),
        Err(TmplError::PluginAlreadyInstalled(_))
    ));

    let other = self::app("other");
    assert!(matches!(
        other.install(jinja),
        Err(TmplError::PluginAlreadyInstalled(_))
    ));
}

#[test]
fn test_unknown_extension_fails_setup() {
    let app = app("jinja2");
    let result = app.install(Arc::new(
        JinjaPlugin::builder().extensions(["does-not-exist"]).build(),
    ));
    assert!(matches!(result, Err(TmplError::ImproperlyConfigured(_))));
    assert!(!app.has_plugin("jinja"));
}

// ============================================================================
// 3. Context layering
// ============================================================================

#[tokio::test]
async fn test_providers_merge_in_order() {
    let app = app("ctx");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);

    jinja.add_context(|| context_from([("a", 1), ("shared", 1)]));
    jinja.add_context(|| context_from([("b", 2), ("shared", 2)]));

    let ctx = jinja.get_context(context_from([("c", 3)])).await.unwrap();
    assert_eq!(ctx["a"], Value::from(1));
    assert_eq!(ctx["b"], Value::from(2));
    assert_eq!(ctx["c"], Value::from(3));
    assert_eq!(ctx["shared"], Value::from(2));
}

#[tokio::test]
async fn test_explicit_context_wins() {
    let app = app("ctx");
    let jinja = web_plugin(&app);

    let out = jinja
        .render_str("{{ global }}", context_from([("global", "override")]))
        .await
        .unwrap();
    assert_eq!(out, "override");
}

#[tokio::test]
async fn test_async_provider() {
    let app = app("ctx");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);

    jinja.add_async_context(|| async {
        tokio::task::yield_now().await;
        Ok(context_from([("user", "alice")]))
    });

    let out = jinja.render_str("{{ user }}", Context::new()).await.unwrap();
    assert_eq!(out, "alice");
}

#[tokio::test]
async fn test_failing_provider_aborts_render() {
    let app = app("ctx");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);

    jinja.add_async_context(|| async {
        Err(TmplError::ContextProviderError("session store unavailable".into()))
    });

    let result = jinja.render_str("unreachable", Context::new()).await;
    assert!(matches!(result, Err(TmplError::ContextProviderError(_))));
}

#[tokio::test]
async fn test_same_provider_added_twice_runs_twice() {
    let app = app("ctx");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let provider = jinja.add_context(move || {
        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
        context_from([("calls", n)])
    });
    jinja.add_context(provider);
    assert_eq!(jinja.provider_count(), 2);

    let ctx = jinja.get_context(Context::new()).await.unwrap();
    assert_eq!(ctx["calls"], Value::from(2_usize));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_state_leaks_between_renders() {
    let app = app("ctx");
    let jinja = web_plugin(&app);

    let first = jinja
        .render_str("[{{ name }}]", context_from([("name", "first")]))
        .await
        .unwrap();
    let second = jinja.render_str("[{{ name }}]", Context::new()).await.unwrap();

    assert_eq!(first, "[first]");
    assert_eq!(second, "[]");

    let ctx = jinja.get_context(Context::new()).await.unwrap();
    assert!(!ctx.contains_key("name"));
}

// ============================================================================
// 4. Observers
// ============================================================================

#[tokio::test]
async fn test_observer_sees_final_context() {
    let app = app("obs");
    let jinja = web_plugin(&app);
    let recorder = Arc::new(RenderRecorder::default());

    {
        let _guard = jinja.observe(recorder.observer());
        jinja
            .render("template.html", context_from([("name", "jinja2")]))
            .await
            .unwrap();
    }
    jinja.render_str("after", Context::new()).await.unwrap();

    let records = recorder.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].template, "template.html");
    assert_eq!(records[0].context["name"].as_str(), Some("jinja2"));
    assert_eq!(records[0].context["global"].as_str(), Some("done"));
    assert!(jinja.observer_ids().is_empty());
}

#[tokio::test]
async fn test_failing_observer_aborts_render() {
    let app = app("obs");
    let jinja = web_plugin(&app);
    let fired = Arc::new(AtomicUsize::new(0));

    let f = fired.clone();
    jinja.connect_observer(
        "counter",
        Arc::new(move |_: &TemplateRef, _: &Context| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    jinja.connect_observer(
        "broken",
        Arc::new(|_: &TemplateRef, _: &Context| -> ReceiverResult { Err("panel full".into()) }),
    );

    let err = jinja.render_str("x", Context::new()).await.unwrap_err();
    assert!(matches!(err, TmplError::ObserverError(_)));
    assert!(err.to_string().contains("broken"));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    assert!(jinja.disconnect_observer("broken"));
    assert_eq!(jinja.render_str("x", Context::new()).await.unwrap(), "x");
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scoped_observer_removed_after_failed_render() {
    let app = app("obs");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);
    jinja.add_async_context(|| async {
        Err(TmplError::ContextProviderError("session store unavailable".into()))
    });
    let recorder = Arc::new(RenderRecorder::default());

    {
        let _guard = jinja.observe(recorder.observer());
        let result = jinja.render_str("x", Context::new()).await;
        assert!(matches!(result, Err(TmplError::ContextProviderError(_))));
    }

    assert!(jinja.observer_ids().is_empty());
    assert!(recorder.records().is_empty());
}

#[tokio::test]
async fn test_scoped_observer_removed_when_render_panics() {
    let app = app("obs");
    let jinja = memory_plugin(&app, Arc::new(StringLoader::new()), 50);
    let armed = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let a = armed.clone();
    jinja.add_context(move || {
        assert!(!a.load(Ordering::SeqCst), "provider exploded");
        Context::new()
    });

    let task = tokio::spawn({
        let jinja = Arc::clone(&jinja);
        async move {
            let recorder = Arc::new(RenderRecorder::default());
            let _guard = jinja.observe(recorder.observer());
            assert_eq!(jinja.observer_ids().len(), 1);
            jinja.render_str("x", Context::new()).await
        }
    });

    assert!(task.await.unwrap_err().is_panic());
    assert!(jinja.observer_ids().is_empty());

    armed.store(false, Ordering::SeqCst);
    assert_eq!(jinja.render_str("x", Context::new()).await.unwrap(), "x");
}

// ============================================================================
// 5. Caching and reloading
// ============================================================================

#[tokio::test]
async fn test_cache_size_bounds_compiled_templates() {
    let loader = Arc::new(StringLoader::new());
    loader.add("a.html", "A");
    loader.add("b.html", "B");
    loader.add("c.html", "C");

    let app = app("cache");
    let jinja = memory_plugin(&app, loader, 2);

    for name in ["a.html", "b.html", "a.html", "c.html"] {
        jinja.render(name, Context::new()).await.unwrap();
    }
    assert_eq!(jinja.cached_templates().unwrap(), vec!["a.html", "c.html"]);
}

#[tokio::test]
async fn test_cached_template_is_not_reloaded() {
    let loader = Arc::new(StringLoader::new());
    loader.add("page.html", "v1");

    let app = app("cache");
    let jinja = memory_plugin(&app, Arc::clone(&loader), 50);

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v1");
    loader.add("page.html", "v2");
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v1");
}

#[tokio::test]
async fn test_zero_cache_size_reloads_every_render() {
    let loader = Arc::new(StringLoader::new());
    loader.add("page.html", "v1");

    let app = app("cache");
    let jinja = memory_plugin(&app, Arc::clone(&loader), 0);

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v1");
    loader.add("page.html", "v2");
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v2");
    assert!(jinja.cached_templates().unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_reload_picks_up_changes() {
    let loader = Arc::new(StringLoader::new());
    loader.add("page.html", "v1");

    let app = app("reload");
    let jinja = app
        .install(Arc::new(
            JinjaPlugin::builder()
                .loader(Arc::clone(&loader) as Arc<dyn TemplateLoader>)
                .auto_reload(true)
                .build(),
        ))
        .unwrap();

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v1");
    loader.add("page.html", "v2");
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v2");
}

fn extends_loader() -> Arc<StringLoader> {
    let loader = Arc::new(StringLoader::new());
    loader.add("layout.html", "L1[{% block body %}{% endblock %}]");
    loader.add(
        "page.html",
        r#"{% extends "layout.html" %}{% block body %}P{% endblock %}"#,
    );
    loader
}

#[tokio::test]
async fn test_auto_reload_follows_extends() {
    let loader = extends_loader();
    let app = app("reload");
    let jinja = app
        .install(Arc::new(
            JinjaPlugin::builder()
                .loader(Arc::clone(&loader) as Arc<dyn TemplateLoader>)
                .auto_reload(true)
                .build(),
        ))
        .unwrap();

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L1[P]");

    loader.add("layout.html", "L2[{% block body %}{% endblock %}]");
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L2[P]");

    loader.add(
        "page.html",
        r#"{% extends "layout.html" %}{% block body %}Q{% endblock %}"#,
    );
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L2[Q]");
}

#[tokio::test]
async fn test_cache_counts_parent_templates() {
    let roomy = app("cache");
    let jinja = memory_plugin(&roomy, extends_loader(), 50);

    jinja.render("page.html", Context::new()).await.unwrap();
    assert_eq!(
        jinja.cached_templates().unwrap(),
        vec!["page.html", "layout.html"]
    );

    let tight = app("cache-one");
    let jinja = memory_plugin(&tight, extends_loader(), 1);
    jinja.render("page.html", Context::new()).await.unwrap();
    assert_eq!(jinja.cached_templates().unwrap(), vec!["layout.html"]);
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L1[P]");
    assert_eq!(jinja.cached_templates().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_cache_size_recompiles_parents() {
    let loader = extends_loader();
    let app = app("cache");
    let jinja = memory_plugin(&app, Arc::clone(&loader), 0);

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L1[P]");
    assert!(jinja.cached_templates().unwrap().is_empty());

    loader.add("layout.html", "L2[{% block body %}{% endblock %}]");
    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "L2[P]");
}

#[tokio::test]
async fn test_auto_reload_from_disk() {
    let dir = std::env::temp_dir().join("tmpl_rs_plugin_reload");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("page.html");
    std::fs::write(&path, "v1").unwrap();

    let app = app("reload");
    let jinja = app
        .install(Arc::new(
            JinjaPlugin::builder()
                .template_folders([&dir])
                .auto_reload(true)
                .build(),
        ))
        .unwrap();

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v1");

    std::fs::write(&path, "v2").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(10))
        .unwrap();

    assert_eq!(jinja.render("page.html", Context::new()).await.unwrap(), "v2");
    let _ = std::fs::remove_dir_all(&dir);
}

// ============================================================================
// 6. Configuration from application settings
// ============================================================================

#[tokio::test]
async fn test_settings_table_configures_plugin() {
    let settings = Settings::named("configured").with_plugin_options(
        "jinja",
        json!({"template_folders": ["tests"], "cache_size": 1, "extensions": ["pycompat"]}),
    );
    let app = Application::new(settings);
    let jinja = app
        .install(Arc::new(JinjaPlugin::builder().cache_size(3).build()))
        .unwrap();

    let config = jinja.config().unwrap();
    assert_eq!(config.cache_size, 3);
    assert_eq!(config.extensions, vec!["pycompat"]);

    let out = jinja
        .render_str("{{ name.upper() }}", context_from([("name", "jinja")]))
        .await
        .unwrap();
    assert_eq!(out, "JINJA");
}

#[tokio::test]
async fn test_custom_plugin_name_reads_its_own_table() {
    let settings = Settings::named("multi")
        .with_plugin_options("emails", json!({"template_folders": ["emails"]}));
    let app = Application::new(settings);

    let web = app.install(Arc::new(JinjaPlugin::new())).unwrap();
    let emails = app
        .install(Arc::new(JinjaPlugin::builder().name("emails").build()))
        .unwrap();

    assert_eq!(web.config().unwrap().template_folders, vec![PathBuf::from("templates")]);
    assert_eq!(emails.config().unwrap().template_folders, vec![PathBuf::from("emails")]);
    assert_eq!(app.plugin_names(), vec!["jinja", "emails"]);
}

// ============================================================================
// 7. Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renders_with_scoped_observers() {
    let app = app("concurrent");
    let jinja = web_plugin(&app);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let jinja = Arc::clone(&jinja);
        let seen = Arc::clone(&seen);
        handles.push(tokio::spawn(async move {
            let recorder = Arc::new(RenderRecorder::default());
            let _guard = jinja.observe(recorder.observer());
            let out = jinja
                .render("template.html", context_from([("name", format!("user{i}"))]))
                .await
                .unwrap();
            assert!(out.contains(&format!("<h1>Hello user{i}!</h1>")));
            seen.lock().unwrap().push(recorder.records().len());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(seen.lock().unwrap().len(), 16);
    assert!(seen.lock().unwrap().iter().all(|&n| n >= 1));
    assert!(jinja.observer_ids().is_empty());
}
