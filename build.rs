use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use syntect::dumps::dump_to_uncompressed_file;
use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, css_for_theme_with_class_style};
use two_face::syntax;

const LIGHT_THEME: &str = "base16-ocean.light";
const DARK_THEME: &str = "base16-ocean.dark";

fn main() {
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(err) => panic!("OUT_DIR not set: {err}"),
    };

    write_syntax_pack(&out_dir).expect("failed to write syntax pack");
    write_theme_css(&out_dir).expect("failed to write syntax theme css");

    println!("cargo:rerun-if-changed=build.rs");
}

fn write_syntax_pack(out_dir: &Path) -> Result<(), String> {
    let syntax_set = syntax::extra_newlines();
    let pack_path = out_dir.join("syntaxes.packdump");
    dump_to_uncompressed_file(&syntax_set, &pack_path)
        .map_err(|err| format!("failed to encode syntax set: {err}"))?;

    println!("cargo:rustc-env=SYNTAX_PACK_FILE={}", pack_path.display());

    Ok(())
}

fn write_theme_css(out_dir: &Path) -> Result<(), String> {
    let theme_set = ThemeSet::load_defaults();

    for (env_key, theme_name, file_name) in [
        ("SYNTAX_CSS_LIGHT_FILE", LIGHT_THEME, "syntax-light.css"),
        ("SYNTAX_CSS_DARK_FILE", DARK_THEME, "syntax-dark.css"),
    ] {
        let theme = theme_set
            .themes
            .get(theme_name)
            .ok_or_else(|| format!("theme `{theme_name}` not found"))?;

        let css =
            css_for_theme_with_class_style(theme, ClassStyle::SpacedPrefixed { prefix: "syntax-" })
                .map_err(|err| err.to_string())?;

        let css_path = out_dir.join(file_name);
        fs::write(&css_path, css)
            .map_err(|err| format!("failed to write {}: {err}", css_path.display()))?;

        println!("cargo:rustc-env={env_key}={}", css_path.display());
    }

    Ok(())
}
