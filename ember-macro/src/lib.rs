extern crate proc_macro;

use heck::MixedCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    braced,
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    token, Error, Ident, Result, Token,
};

mod kw {
    syn::custom_keyword!(UniformData);
    syn::custom_keyword!(AccelerationStructure);
    syn::custom_keyword!(StorageBuffer);
    syn::custom_keyword!(StorageImage);
    syn::custom_keyword!(Read);
    syn::custom_keyword!(Write);
}

enum Access {
    Read,
    Write,
}

enum BindingType {
    UniformData { ty: Ident },
    AccelerationStructure,
    StorageBuffer,
    StorageImage { access: Access },
}

struct Binding {
    name: Ident,
    ty: BindingType,
}

struct Layout {
    visibility: Option<Token![pub]>,
    name: Ident,
    bindings: Punctuated<Binding, token::Comma>,
}

impl Parse for Access {
    fn parse(input: ParseStream) -> Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(kw::Read) {
            input.parse::<kw::Read>()?;
            Ok(Access::Read)
        } else if lookahead.peek(kw::Write) {
            input.parse::<kw::Write>()?;
            Ok(Access::Write)
        } else {
            Err(lookahead.error())
        }
    }
}

impl Parse for BindingType {
    fn parse(input: ParseStream) -> Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(kw::UniformData) {
            input.parse::<kw::UniformData>()?;
            input.parse::<token::Lt>()?;
            let ty = input.parse()?;
            input.parse::<token::Gt>()?;
            Ok(BindingType::UniformData { ty })
        } else if lookahead.peek(kw::AccelerationStructure) {
            input.parse::<kw::AccelerationStructure>()?;
            Ok(BindingType::AccelerationStructure)
        } else if lookahead.peek(kw::StorageBuffer) {
            input.parse::<kw::StorageBuffer>()?;
            Ok(BindingType::StorageBuffer)
        } else if lookahead.peek(kw::StorageImage) {
            let keyword = input.parse::<kw::StorageImage>()?;
            if !input.peek(token::Lt) {
                return Err(Error::new(
                    keyword.span,
                    "expected `StorageImage<Read>` or `StorageImage<Write>`",
                ));
            }
            input.parse::<token::Lt>()?;
            let access = input.parse()?;
            input.parse::<token::Gt>()?;
            Ok(BindingType::StorageImage { access })
        } else {
            Err(lookahead.error())
        }
    }
}

impl Parse for Binding {
    fn parse(input: ParseStream) -> Result<Self> {
        let name = input.parse()?;
        input.parse::<token::Colon>()?;
        let ty = input.parse()?;
        Ok(Self { name, ty })
    }
}

impl Parse for Layout {
    fn parse(input: ParseStream) -> Result<Self> {
        let visibility = input.parse()?;
        let name: Ident = input.parse()?;
        let content;
        let _brace_token: token::Brace = braced!(content in input);
        let bindings = content.parse_terminated(Binding::parse)?;
        if bindings.is_empty() {
            return Err(Error::new(name.span(), "pass layout must have at least one binding"));
        }
        Ok(Self {
            visibility,
            name,
            bindings,
        })
    }
}

impl Binding {
    fn get_kind(&self) -> TokenStream2 {
        match self.ty {
            BindingType::UniformData { ref ty } => quote!(BindingKind::UniformData {
                size: ::std::mem::size_of::<#ty>() as u32,
            }),
            BindingType::AccelerationStructure => quote!(BindingKind::AccelerationStructure),
            BindingType::StorageBuffer => quote!(BindingKind::StorageBuffer),
            BindingType::StorageImage { access: Access::Read } => quote!(BindingKind::StorageImageRead),
            BindingType::StorageImage { access: Access::Write } => quote!(BindingKind::StorageImageWrite),
        }
    }

    fn get_slot(&self, slot: u32) -> TokenStream2 {
        let name = self.name.to_string().to_mixed_case();
        let kind = self.get_kind();
        quote!(BindingSlot {
            slot: #slot,
            name: #name,
            kind: #kind,
        })
    }

    fn get_entry(&self, slot: u32) -> (TokenStream2, TokenStream2) {
        let kind = self.get_kind();
        let (arg, resource) = match self.ty {
            BindingType::UniformData { ref ty } => {
                let data = format_ident!("{}_data", self.name);
                (
                    quote!(#data: &'a #ty),
                    quote!(BoundResource::Uniform(bytemuck::bytes_of(#data))),
                )
            }
            BindingType::AccelerationStructure => {
                let accel = format_ident!("{}_accel", self.name);
                (quote!(#accel: AccelId), quote!(BoundResource::Accel(#accel)))
            }
            BindingType::StorageBuffer => {
                let buffer = format_ident!("{}_buffer", self.name);
                (quote!(#buffer: BufferId), quote!(BoundResource::Buffer(#buffer)))
            }
            BindingType::StorageImage { .. } => {
                let image = format_ident!("{}_image", self.name);
                (quote!(#image: ImageId), quote!(BoundResource::Image(#image)))
            }
        };
        (
            arg,
            quote!(BindingEntry {
                slot: #slot,
                resource: #resource,
                kind: #kind,
            }),
        )
    }
}

#[proc_macro]
pub fn pass_layout(input: TokenStream) -> TokenStream {
    let Layout {
        visibility,
        name,
        bindings,
    } = parse_macro_input!(input as Layout);

    let slots: Vec<_> = bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| binding.get_slot(index as u32))
        .collect();
    let (entry_args, entries): (Vec<_>, Vec<_>) = bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| binding.get_entry(index as u32))
        .unzip();

    quote!(
        #[derive(Debug, Clone, Copy)]
        #visibility struct #name;

        impl #name {
            pub const BINDINGS: &'static [BindingSlot] = &[#(#slots),*];

            #[allow(clippy::too_many_arguments)]
            pub fn entries<'a>(#(#entry_args),*) -> Vec<BindingEntry<'a>> {
                vec![#(#entries),*]
            }
        }
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_keeps_declaration_order() {
        let layout: Layout =
            syn::parse_str("pub TestLayout { data: UniformData<TestData>, input: StorageImage<Read>, output: StorageImage<Write> }")
                .unwrap();
        assert!(layout.visibility.is_some());
        assert_eq!(layout.name, "TestLayout");
        let names: Vec<String> = layout.bindings.iter().map(|binding| binding.name.to_string()).collect();
        assert_eq!(names, ["data", "input", "output"]);
    }

    #[test]
    fn empty_layout_is_rejected() {
        let err = syn::parse_str::<Layout>("EmptyLayout {}").err().unwrap();
        assert!(err.to_string().contains("at least one binding"));
    }

    #[test]
    fn storage_image_needs_access() {
        assert!(syn::parse_str::<Layout>("TestLayout { output: StorageImage }").is_err());
    }
}
