//! The fixed catalog of platform applications keel can enable

/// One installable platform application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Application name, also the file name under `apps/`
    pub name: &'static str,
    /// Helm chart name
    pub chart: &'static str,
    /// Helm repository URL
    pub chart_repo: &'static str,
    /// Default chart version
    pub version: &'static str,
    /// Namespace the chart is installed into
    pub namespace: &'static str,
}

/// Every application keel knows how to render
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "cert-manager",
        chart: "cert-manager",
        chart_repo: "https://charts.jetstack.io",
        version: "v1.16.2",
        namespace: "cert-manager",
    },
    CatalogEntry {
        name: "ingress-nginx",
        chart: "ingress-nginx",
        chart_repo: "https://kubernetes.github.io/ingress-nginx",
        version: "4.11.3",
        namespace: "ingress-nginx",
    },
    CatalogEntry {
        name: "external-dns",
        chart: "external-dns",
        chart_repo: "https://kubernetes-sigs.github.io/external-dns",
        version: "1.15.0",
        namespace: "external-dns",
    },
    CatalogEntry {
        name: "metrics-server",
        chart: "metrics-server",
        chart_repo: "https://kubernetes-sigs.github.io/metrics-server",
        version: "3.12.2",
        namespace: "kube-system",
    },
];

/// Find a catalog entry by name
pub fn lookup(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.name == name)
}

/// Catalog names, comma-separated
pub fn names() -> String {
    CATALOG
        .iter()
        .map(|entry| entry.name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut seen: Vec<&str> = CATALOG.iter().map(|e| e.name).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), CATALOG.len());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(lookup("cert-manager").map(|e| e.namespace), Some("cert-manager"));
        assert!(lookup("istio").is_none());
        assert!(names().contains("metrics-server"));
    }
}
