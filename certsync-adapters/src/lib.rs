//! Concrete importers and exporters shipped with certsync.
//!
//! | name      | kind     | module       |
//! |-----------|----------|--------------|
//! | `mock`    | importer | [`mock`]     |
//! | `vault`   | importer | [`vault`]    |
//! | `stdout`  | exporter | [`stdout`]   |
//! | `traefik` | exporter | [`traefik`]  |

pub mod mock;
pub mod stdout;
pub mod traefik;
pub mod vault;

use certsync_daemon::AdapterRegistry;

pub use mock::MockImporter;
pub use stdout::StdoutExporter;
pub use traefik::TraefikExporter;
pub use vault::VaultImporter;

/// Registry holding every built-in adapter, unconfigured.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register_importer(MockImporter::new())
        .register_importer(VaultImporter::new())
        .register_exporter(StdoutExporter::new())
        .register_exporter(TraefikExporter::new());
    registry
}
