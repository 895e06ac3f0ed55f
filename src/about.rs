pub const SITEVISIT_DISPLAY_VERSION: &str = env!("SITEVISIT_DISPLAY_VERSION");
pub const SITEVISIT_BUILD_N: &str = env!("SITEVISIT_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "sitevisit {}\nBuild {}\nIndustry site visit tracker",
        SITEVISIT_DISPLAY_VERSION, SITEVISIT_BUILD_N
    )
}
