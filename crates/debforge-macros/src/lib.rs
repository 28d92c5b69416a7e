use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprArray, ExprLit, ExprPath, ItemStruct, Lit, Meta, Token, parse::Parser,
    spanned::Spanned,
};

/// Turns a phase config struct into a workflow phase.
///
/// ```ignore
/// #[Phase(phase = PhaseName::Build, default_label = "Build application")]
/// pub struct BuildPhase { label: Option<String>, .. }
/// ```
///
/// The struct must implement `Default` + `Deserialize` and provide
/// `fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()>`.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Phase(attr: TokenStream, item: TokenStream) -> TokenStream {
    match phase_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

/// Wires an ordered list of `#[Phase]` structs into a plan and a registry.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Pipeline(attr: TokenStream, item: TokenStream) -> TokenStream {
    match pipeline_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn expr_path(expr: &Expr) -> syn::Result<syn::Path> {
    match expr {
        Expr::Path(ExprPath { path, .. }) => Ok(path.clone()),
        _ => Err(syn::Error::new(expr.span(), "expected path")),
    }
}

fn expr_array_paths(expr: &Expr) -> syn::Result<Vec<syn::Path>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    elems.iter().map(expr_path).collect()
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            let Some(ident) = p.get_ident() else {
                return true;
            };
            ident != "Phase" && ident != "Pipeline"
        })
        .cloned()
        .collect()
}

fn parse_key_values(attr: TokenStream) -> syn::Result<Vec<(String, syn::MetaNameValue)>> {
    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let mut out = Vec::new();
    for m in parser.parse(attr)? {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        out.push((key, nv));
    }
    Ok(out)
}

fn phase_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let mut phase: Option<syn::Path> = None;
    let mut default_label: Option<String> = None;
    let mut config_path: Option<String> = None;

    for (key, nv) in parse_key_values(attr)? {
        let v = &nv.value;
        match key.as_str() {
            "phase" => phase = Some(expr_path(v)?),
            "default_label" => default_label = Some(lit_str(v)?),
            "config_path" => config_path = Some(lit_str(v)?),
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Phase attribute key '{other}'"),
                ));
            }
        }
    }

    let phase =
        phase.ok_or_else(|| syn::Error::new(struct_ident.span(), "Phase: missing phase"))?;
    let default_label = default_label
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "Phase: missing default_label"))?;

    // Default: phases.<variant>, e.g. PhaseName::Build -> phases.build.
    let config_path = match config_path {
        Some(p) => p,
        None => {
            let variant = phase
                .segments
                .last()
                .ok_or_else(|| syn::Error::new(phase.span(), "Phase: empty phase path"))?
                .ident
                .to_string();
            format!("phases.{}", variant.to_lowercase())
        }
    };

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const PHASE: crate::orchestrator::PhaseName = #phase;
            pub const CONFIG_PATH: &'static str = #config_path;
            pub const DEFAULT_LABEL: &'static str = #default_label;

            pub fn load(doc: &crate::config::ConfigDoc) -> crate::Result<Self> {
                Ok(doc
                    .deserialize_path::<Self>(#config_path)?
                    .unwrap_or_default())
            }

            pub fn plan(doc: &crate::config::ConfigDoc, plan: &mut crate::planner::Plan) -> crate::Result<()> {
                let cfg = Self::load(doc)?;
                let label = cfg
                    .label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| #default_label.to_string());

                plan.add(crate::planner::PlannedPhase {
                    phase: #phase,
                    label,
                    config_path: #config_path.to_string(),
                })
            }

            pub fn exec(doc: &crate::config::ConfigDoc, ctx: &mut crate::orchestrator::PhaseCtx<'_>) -> crate::Result<()> {
                let cfg = Self::load(doc)?;

                // Phases define their behavior by implementing:
                // `fn run(cfg: &Self, doc: &crate::config::ConfigDoc, ctx: &mut crate::orchestrator::PhaseCtx<'_>) -> crate::Result<()>`
                Self::run(&cfg, doc, ctx)
            }
        }
    };

    Ok(expanded.into())
}

fn pipeline_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let mut phases: Option<Vec<syn::Path>> = None;
    for (key, nv) in parse_key_values(attr)? {
        match key.as_str() {
            "phases" => phases = Some(expr_array_paths(&nv.value)?),
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Pipeline attribute key '{other}'"),
                ));
            }
        }
    }
    let phases =
        phases.ok_or_else(|| syn::Error::new(struct_ident.span(), "Pipeline: missing phases"))?;
    if phases.is_empty() {
        return Err(syn::Error::new(
            struct_ident.span(),
            "Pipeline: phases must not be empty",
        ));
    }

    let plan_phases = phases.iter().map(|p| quote! { #p::plan(doc, &mut plan)?; });
    let reg_phases = phases.iter().map(|p| quote! { reg.add(#p::PHASE, #p::exec)?; });

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub fn plan(doc: &crate::config::ConfigDoc) -> crate::Result<crate::planner::Plan> {
                let mut plan = crate::planner::Plan::default();
                #(#plan_phases)*
                plan.finalize()?;
                Ok(plan)
            }

            pub fn registry() -> crate::Result<crate::orchestrator::PhaseRegistry> {
                let mut reg = crate::orchestrator::PhaseRegistry::default();
                #(#reg_phases)*
                Ok(reg)
            }
        }
    };

    Ok(expanded.into())
}
