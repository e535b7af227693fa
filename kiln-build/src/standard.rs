//! The standard phase set for a static front-end project.
//!
//! | Phase           | Action                      | Output                                |
//! |-----------------|-----------------------------|---------------------------------------|
//! | `clean:server`  | clean                       | `${staging}`                          |
//! | `clean:dist`    | clean                       | `${dist}`                             |
//! | `compass`       | style compiler, once        | `${staging}/${styles}` (merging)      |
//! | `copy:styles`   | copy                        | `${staging}/${styles}` (merging)      |
//! | `imagemin`      | image compressor, per file  | `${dist}/${images}`                   |
//! | `autoprefixer`  | prefixer, per file          | `${staging}`                          |
//! | `useminPrepare` | markup scan                 | `${staging}/.kiln/usemin.json`        |
//! | `concat`        | bundle concatenation        | `${staging}/concat`                   |
//! | `cssmin`        | minifier, per css bundle    | `${dist}`                             |
//! | `uglify`        | minifier, per js bundle     | `${dist}`                             |
//! | `copy:dist`     | copy                        | `${dist}`                             |
//! | `modernizr`     | feature detection, once     | `${dist}/bower_components/modernizr`  |
//! | `rev`           | content-hash rename         | `${dist}`                             |
//! | `usemin`        | reference rewrite           | `${dist}`                             |
//! | `htmlmin`       | markup minifier, per file   | `${dist}`                             |
//! | `mocha`         | browser test runner, once   | `${staging}/.kiln/mocha`              |

use kiln_core::{CommandSpec, Manifest, PhaseName};
use kiln_renderer::ServerCtx;

use crate::error::BuildError;
use crate::fsops::{CleanAction, CopyAction, CopySource};
use crate::registry::{Phase, PhaseRegistry};
use crate::revision::RevAction;
use crate::tool::{FanOut, ToolAction};
use crate::usemin::{BundleKind, ConcatAction, PrepareAction, RewriteAction};

/// Standard phase names.
pub mod names {
    pub const CLEAN_SERVER: &str = "clean:server";
    pub const CLEAN_DIST: &str = "clean:dist";
    pub const COMPASS: &str = "compass";
    pub const COPY_STYLES: &str = "copy:styles";
    pub const IMAGEMIN: &str = "imagemin";
    pub const AUTOPREFIXER: &str = "autoprefixer";
    pub const USEMIN_PREPARE: &str = "useminPrepare";
    pub const CONCAT: &str = "concat";
    pub const CSSMIN: &str = "cssmin";
    pub const UGLIFY: &str = "uglify";
    pub const COPY_DIST: &str = "copy:dist";
    pub const MODERNIZR: &str = "modernizr";
    pub const REV: &str = "rev";
    pub const USEMIN: &str = "usemin";
    pub const HTMLMIN: &str = "htmlmin";
    pub const MOCHA: &str = "mocha";
}

/// Where `useminPrepare` writes the minification plan.
pub const MINIFY_PLAN: &str = "${staging}/.kiln/usemin.json";

/// Where `rev` records its renames.
pub const REV_MANIFEST: &str = "${staging}/.kiln/rev.json";

fn tool(name: &str, spec: &CommandSpec, fan_out: FanOut) -> Result<ToolAction, BuildError> {
    ToolAction::new(name, spec, fan_out).map_err(|source| BuildError::Template {
        name: PhaseName::from(name),
        source,
    })
}

/// Register every standard phase, with collaborator commands taken from
/// `manifest`.
pub fn standard_registry(manifest: &Manifest) -> Result<PhaseRegistry, BuildError> {
    use names::*;

    let tools = &manifest.tools;
    let mut registry = PhaseRegistry::new();
    let none: [&str; 0] = [];

    registry.register(Phase::new(CLEAN_SERVER, ["${staging}"], "${staging}", CleanAction))?;
    registry.register(Phase::new(
        CLEAN_DIST,
        ["${staging}", "${dist}/*", "!${dist}/.git*"],
        "${dist}",
        CleanAction,
    ))?;

    registry.register(
        Phase::new(
            COMPASS,
            ["${source}/${styles}/**/*.{scss,sass}"],
            "${staging}/${styles}",
            tool(COMPASS, &tools.compass, FanOut::Once)?,
        )
        .merging(),
    )?;

    let copy_styles = CopyAction::new(vec![CopySource::new(
        "${source}/${styles}",
        &["{,*/}*.css"],
    )]);
    registry.register(
        Phase::new(COPY_STYLES, copy_styles.inputs(), "${staging}/${styles}", copy_styles)
            .merging(),
    )?;

    registry.register(Phase::new(
        IMAGEMIN,
        ["${source}/${images}/{,*/}*.{gif,jpeg,jpg,png}"],
        "${dist}/${images}",
        tool(IMAGEMIN, &tools.imagemin, FanOut::EachFile)?,
    ))?;

    registry.register(Phase::new(
        AUTOPREFIXER,
        ["${staging}/${styles}/{,*/}*.css"],
        "${staging}",
        tool(AUTOPREFIXER, &tools.autoprefixer, FanOut::EachFile)?,
    ))?;

    registry.register(Phase::new(
        USEMIN_PREPARE,
        ["${source}/{,*/}*.html"],
        MINIFY_PLAN,
        PrepareAction,
    ))?;
    registry.register(Phase::new(
        CONCAT,
        [MINIFY_PLAN],
        "${staging}/concat",
        ConcatAction::new(["${staging}", "${source}"]),
    ))?;

    for (name, spec, kind) in [
        (CSSMIN, &tools.cssmin, BundleKind::Css),
        (UGLIFY, &tools.uglify, BundleKind::Js),
    ] {
        let fan_out = FanOut::EachBundle {
            kind,
            plan: MINIFY_PLAN.to_string(),
        };
        registry.register(Phase::new(
            name,
            ["${staging}/concat"],
            "${dist}",
            tool(name, spec, fan_out)?,
        ))?;
    }

    let copy_dist = CopyAction::new(vec![
        CopySource::new(
            "${source}",
            &[
                "*.{ico,png,txt}",
                ".htaccess",
                "${images}/{,*/}*.webp",
                "{,*/}*.html",
                "${styles}/fonts/{,*/}*.*",
            ],
        ),
        CopySource::new("${staging}", &["${styles}/{,*/}*.css"]),
    ]);
    registry.register(Phase::new(COPY_DIST, copy_dist.inputs(), "${dist}", copy_dist))?;

    registry.register(Phase::new(
        MODERNIZR,
        [
            "${dist}/${scripts}/{,*/}*.js",
            "${dist}/${styles}/{,*/}*.css",
            "!${dist}/${scripts}/vendor/*",
        ],
        "${dist}/bower_components/modernizr",
        tool(MODERNIZR, &tools.modernizr, FanOut::Once)?,
    ))?;

    registry.register(Phase::new(
        REV,
        [
            "${dist}/${scripts}/{,*/}*.js",
            "${dist}/${styles}/{,*/}*.css",
            "${dist}/${images}/{,*/}*.{gif,jpeg,jpg,png,webp}",
            "${dist}/${styles}/fonts/{,*/}*.*",
        ],
        "${dist}",
        RevAction::new(REV_MANIFEST),
    ))?;

    registry.register(Phase::new(
        USEMIN,
        ["${dist}/{,*/}*.html", "${dist}/${styles}/{,*/}*.css"],
        "${dist}",
        RewriteAction::new(REV_MANIFEST),
    ))?;

    registry.register(Phase::new(
        HTMLMIN,
        ["${dist}/{,*/}*.html"],
        "${dist}",
        tool(HTMLMIN, &tools.htmlmin, FanOut::EachFile)?,
    ))?;

    let test_server = ServerCtx::new(&manifest.server.hostname, manifest.server.test_port);
    registry.register(Phase::new(
        MOCHA,
        none,
        "${staging}/.kiln/mocha",
        tool(MOCHA, &tools.mocha, FanOut::Once)?
            .with_server(test_server)
            .streaming(),
    ))?;

    Ok(registry)
}
