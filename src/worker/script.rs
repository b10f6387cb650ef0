//! Renders the browser-side service worker for a [`WorkerConfig`].

use std::fmt::Write as _;

use crate::config::WorkerConfig;
use crate::worker::strategy::{CacheStrategy, InstallPolicy};

/// Returns the service worker JavaScript implementing `config`.
///
/// The script mirrors the in-process worker: same cache name, manifest,
/// exemptions, write-back and stale-cache handling.
#[must_use]
pub fn service_worker_js(config: &WorkerConfig) -> String {
    let strategy = config.strategy;
    let mut js = String::with_capacity(2048);

    let _ = writeln!(js, "// echonet service worker ({strategy})");
    let _ = writeln!(js, "const CACHE_NAME = {};", js_string(&config.cache_name));
    let _ = writeln!(js, "const PRECACHE = {};", js_list(&config.manifest));
    let exempt: &[String] = if strategy == CacheStrategy::NetworkFirstExempt {
        &config.exempt_paths
    } else {
        &[]
    };
    let _ = writeln!(js, "const EXEMPT = {};", js_list(exempt));
    let _ = writeln!(js, "const WRITE_BACK = {};", config.write_back);
    js.push('\n');

    js.push_str(match strategy.install_policy() {
        InstallPolicy::Precache => INSTALL_PRECACHE,
        InstallPolicy::ImmediateClaim => INSTALL_SKIP_WAITING,
    });
    js.push('\n');

    js.push_str(if config.purge_stale_caches {
        ACTIVATE_PURGE
    } else {
        ACTIVATE_KEEP
    });
    if strategy.install_policy() == InstallPolicy::ImmediateClaim {
        js.push_str("\nself.addEventListener('activate', function(event) {\n  event.waitUntil(self.clients.claim());\n});\n");
    }
    js.push('\n');

    js.push_str(STORE_HELPER);
    js.push('\n');
    js.push_str(match strategy {
        CacheStrategy::PrecacheFirst => FETCH_CACHE_FIRST,
        CacheStrategy::NetworkFirstExempt | CacheStrategy::NetworkFirstUniform => {
            FETCH_NETWORK_FIRST
        }
    });
    js
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn js_list(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

const INSTALL_PRECACHE: &str = r"self.addEventListener('install', function(event) {
  event.waitUntil(
    caches.open(CACHE_NAME).then(function(cache) {
      return cache.addAll(PRECACHE);
    })
  );
});
";

const INSTALL_SKIP_WAITING: &str = r"self.addEventListener('install', function(event) {
  self.skipWaiting();
});
";

const ACTIVATE_PURGE: &str = r"self.addEventListener('activate', function(event) {
  event.waitUntil(
    caches.keys().then(function(names) {
      return Promise.all(
        names.filter(function(n) { return n !== CACHE_NAME; })
             .map(function(n) { return caches.delete(n); })
      );
    })
  );
});
";

const ACTIVATE_KEEP: &str = r"self.addEventListener('activate', function(event) {
  event.waitUntil(
    caches.keys().then(function(names) {
      var stale = names.filter(function(n) { return n !== CACHE_NAME; });
      if (stale.length) {
        console.warn('echonet: stale caches left in place', stale);
      }
    })
  );
});
";

const STORE_HELPER: &str = r"function store(request, response) {
  if (WRITE_BACK && request.method === 'GET' && response.ok) {
    var clone = response.clone();
    caches.open(CACHE_NAME).then(function(cache) {
      cache.put(request, clone);
    });
  }
  return response;
}
";

const FETCH_CACHE_FIRST: &str = r"self.addEventListener('fetch', function(event) {
  event.respondWith(
    caches.match(event.request).then(function(cached) {
      return cached || fetch(event.request).then(function(response) {
        return store(event.request, response);
      });
    })
  );
});
";

const FETCH_NETWORK_FIRST: &str = r"self.addEventListener('fetch', function(event) {
  const url = new URL(event.request.url);
  if (EXEMPT.indexOf(url.pathname) !== -1) {
    event.respondWith(fetch(event.request));
    return;
  }
  event.respondWith(
    fetch(event.request).then(function(response) {
      return store(event.request, response);
    }).catch(function() {
      return caches.match(event.request).then(function(cached) {
        return cached || Response.error();
      });
    })
  );
});
";
