//! Assembly text and object image output for whole modules.

use remniw::emit::{ObjectImage, RelocKind, SymbolKind};
use remniw::ir::{
    BinaryOp, CmpCond, FunctionBuilder, GlobalData, GlobalInit, Linkage, Module, ReturnKind,
    Signature, Type, Value,
};
use remniw::test_harness::*;

fn sample_module() -> Module {
    let mut module = Module::new("sample");
    module
        .declare_extern(
            "putchar",
            Signature::new(vec![Type::I32], ReturnKind::Scalar(Type::I32)),
        )
        .push_global(GlobalData {
            name: "message".into(),
            size: 4,
            align: 1,
            init: GlobalInit::Bytes(b"ok!\n".to_vec()),
            readonly: true,
            linkage: Linkage::Internal,
        })
        .push_global(GlobalData {
            name: "cursor".into(),
            size: 8,
            align: 8,
            init: GlobalInit::Addr {
                symbol: "message".into(),
                addend: 2,
            },
            readonly: false,
            linkage: Linkage::Export,
        })
        .push_global(GlobalData {
            name: "scratch".into(),
            size: 32,
            align: 16,
            init: GlobalInit::Zero,
            readonly: false,
            linkage: Linkage::Internal,
        });

    let mut print = FunctionBuilder::new(
        "print_at",
        Signature::new(vec![Type::I64], ReturnKind::Void),
    )
    .with_linkage(Linkage::Internal);
    let base = print.global_addr("message");
    let addr = print.binary(BinaryOp::Add, Type::Ptr, base, print.param(0));
    let byte = print.load(Type::I8, addr, 0);
    print.call("putchar", vec![byte.into()], 1);
    print.ret(vec![]);

    let mut main = FunctionBuilder::new("main", Signature::new(vec![], ReturnKind::Scalar(Type::I32)));
    main.call("print_at", vec![Value::Imm(0)], 0);
    main.call("print_at", vec![Value::Imm(1)], 0);
    let slot = main.global_addr("cursor");
    let tail = main.load(Type::Ptr, slot, 0);
    let bang = main.load(Type::I8, tail, 0);
    main.call("putchar", vec![bang.into()], 1);
    main.ret(vec![Value::Imm(0)]);

    module.push_function(print.finish()).push_function(main.finish());
    module
}

#[test]
fn test_assembly_sections_and_symbols() {
    let text = compile_for_test(&sample_module())
        .unwrap()
        .to_assembly()
        .unwrap();

    assert!(text.starts_with("\t.file\t\"sample\"\n"), "{text}");
    assert!(text.contains("\t.globl\tmain\n"));
    assert!(!text.contains("\t.globl\tprint_at\n"));
    assert!(text.contains("\tcall\tputchar\n"), "{text}");
    assert!(text.contains("\tcall\tprint_at\n"), "{text}");
    assert!(text.contains("\tla\t"), "{text}");

    assert!(text.contains("\t.section\t.rodata\n"));
    assert!(text.contains("message:\n\t.byte\t111, 107, 33, 10\n"), "{text}");
    assert!(text.contains("\t.data\n\t.globl\tcursor\n"), "{text}");
    assert!(text.contains("\t.quad\tmessage+2\n"), "{text}");
    assert!(text.contains("\t.bss\n"));
    assert!(text.contains("\t.zero\t32\n"));
    assert!(text.contains("\t.size\tscratch, 32\n"));
}

#[test]
fn test_object_layout() {
    let image = compile_for_test(&sample_module())
        .unwrap()
        .to_object()
        .unwrap();

    assert_eq!(image.text.len() % 4, 0);
    assert_eq!(image.data_offset % 4096, 0);
    assert!(image.data_offset >= image.text.len() as u64);

    let print = image.symbol("print_at").unwrap();
    let main = image.symbol("main").unwrap();
    assert_eq!(print.kind, SymbolKind::Function);
    assert_eq!(print.offset, 0);
    assert!(!print.global);
    assert_eq!(main.offset, print.size);
    assert!(main.global);

    let message = image.symbol("message").unwrap();
    let cursor = image.symbol("cursor").unwrap();
    let scratch = image.symbol("scratch").unwrap();
    assert_eq!(message.kind, SymbolKind::Data);
    assert_eq!(message.offset, image.data_offset);
    assert_eq!(cursor.offset % 8, 0);
    assert_eq!(scratch.offset % 16, 0);
    assert_eq!(image.len(), scratch.offset + 32);

    let start = (message.offset - image.data_offset) as usize;
    assert_eq!(&image.data[start..start + 4], b"ok!\n");
}

#[test]
fn test_object_relocations() {
    let image = compile_for_test(&sample_module())
        .unwrap()
        .to_object()
        .unwrap();

    let calls: Vec<_> = image
        .relocations
        .iter()
        .filter(|r| r.kind == RelocKind::Call)
        .collect();
    assert_eq!(calls.len(), 2, "{:?}", image.relocations);
    assert!(calls.iter().all(|r| r.symbol == "putchar"));

    let abs: Vec<_> = image
        .relocations
        .iter()
        .filter(|r| r.kind == RelocKind::Abs64)
        .collect();
    assert_eq!(abs.len(), 1);
    assert_eq!(abs[0].symbol, "message");
    assert_eq!(abs[0].addend, 2);
    assert_eq!(abs[0].offset, image.symbol("cursor").unwrap().offset);

    assert_eq!(
        image.undefined_symbols().into_iter().collect::<Vec<_>>(),
        vec!["putchar"]
    );
}

#[test]
fn test_container_round_trip_and_rejection() {
    let image = compile_for_test(&sample_module())
        .unwrap()
        .to_object()
        .unwrap();
    let bytes = image.encode();
    assert!(bytes.starts_with(b"RWOBJ\x01"));
    assert_eq!(ObjectImage::decode(&bytes).unwrap(), image);

    assert!(ObjectImage::decode(b"ELF\x7f").is_err());
    assert!(ObjectImage::decode(&bytes[..bytes.len() - 3]).is_err());
    let mut wrong_version = bytes.clone();
    wrong_version[5] = 9;
    let err = ObjectImage::decode(&wrong_version).unwrap_err();
    assert!(err.to_string().contains("version"), "{err}");
}

#[test]
fn test_relocate_needs_every_symbol() {
    let image = compile_for_test(&sample_module())
        .unwrap()
        .to_object()
        .unwrap();
    let err = image.relocate(IMAGE_BASE, |_| None).unwrap_err();
    assert!(err.to_string().contains("putchar"), "{err}");

    let bytes = image.relocate(IMAGE_BASE, host_address).unwrap();
    let cursor = image.symbol("cursor").unwrap().offset as usize;
    let pointer = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
    assert_eq!(pointer, IMAGE_BASE + image.symbol("message").unwrap().offset + 2);
}

#[test]
fn test_sample_runs() {
    let result = run_function(&sample_module(), "main", &[]).unwrap();
    assert_eq!(result.returned(), Some(0));
    assert_eq!(result.stdout(), "ok!");
}

/// A loop whose exit branch has to jump over more than 4 KiB of code.
#[test]
fn test_far_branches_are_relaxed() {
    const BODY: i64 = 1200;
    let mut b = FunctionBuilder::new(
        "far",
        Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
    );
    let header = b.new_block();
    let body = b.new_block();
    let exit = b.new_block();

    let acc = b.copy(Type::I64, 0);
    let i = b.copy(Type::I64, 0);
    b.br(header);

    b.switch_to(header);
    let more = b.icmp(CmpCond::Slt, Type::I64, i, b.param(0));
    b.cond_br(more, body, exit);

    b.switch_to(body);
    for _ in 0..BODY {
        let next = b.binary(BinaryOp::Add, Type::I64, acc, 1);
        b.assign(Type::I64, acc, next);
    }
    let next = b.binary(BinaryOp::Add, Type::I64, i, 1);
    b.assign(Type::I64, i, next);
    b.br(header);

    b.switch_to(exit);
    b.ret(vec![acc.into()]);

    let mut module = Module::new("far");
    module.push_function(b.finish());

    let image = compile_for_test(&module).unwrap().to_object().unwrap();
    assert!(image.text.len() > 4096);
    let result = Simulator::new(&image).unwrap().call("far", &[3]).unwrap();
    assert_eq!(result.returned(), Some(3 * BODY));
}

#[test]
fn test_loader_rejects_data_over_text() {
    let image = ObjectImage {
        text: vec![0x13, 0, 0, 0, 0x67, 0x80, 0, 0],
        data: vec![0xaa],
        data_offset: 0,
        ..ObjectImage::default()
    };
    let err = ObjectImage::decode(&image.encode()).unwrap_err();
    assert!(err.to_string().starts_with("malformed object image"), "{err}");
    assert!(Simulator::new(&image).is_err());
    assert!(image.relocate(IMAGE_BASE, host_address).is_err());
}
