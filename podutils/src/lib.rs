//! Petits utilitaires partagés par les crates podplay.
//!
//! # Fonctions principales
//!
//! - [`get_os_string`] : décrit le système d'exploitation courant
//! - [`default_user_agent`] : User-Agent HTTP envoyé par défaut
//!
//! # Examples
//!
//! ```
//! use podutils::default_user_agent;
//!
//! let ua = default_user_agent();
//! assert!(ua.starts_with("podplay/"));
//! ```

/// Version du workspace, utilisée dans le User-Agent.
pub const PODPLAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retourne une chaîne décrivant le système d'exploitation et sa version.
///
/// Utilise la crate `os_info` pour obtenir de manière portable et fiable
/// les informations sur le système d'exploitation courant.
///
/// # Format
/// - macOS: "macOS/15.1" ou "Mac OS/10.15.7"
/// - Linux: "Linux/6.5.0" ou "Ubuntu/22.04"
/// - Windows: "Windows/10.0.19045"
/// - Autre: "{OS}/Unknown"
///
/// # Exemples
///
/// ```
/// use podutils::get_os_string;
///
/// let os = get_os_string();
/// assert!(os.contains('/'));
/// ```
pub fn get_os_string() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type());

    // Obtenir la version si disponible
    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version)
    } else {
        format!("{}/Unknown", os_type)
    }
}

/// User-Agent par défaut des requêtes HTTP (flux RSS et fichiers audio).
///
/// Certains hébergeurs de podcasts refusent les requêtes sans User-Agent,
/// d'où une valeur explicite incluant la version et le système.
pub fn default_user_agent() -> String {
    format!("podplay/{} ({})", PODPLAY_VERSION, get_os_string())
}
