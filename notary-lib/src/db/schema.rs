// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

diesel::table! {
    users (user_id) {
        user_id -> Integer,
        username -> Text,
    }
}

diesel::table! {
    certificates (certificate_id) {
        certificate_id -> Integer,
        issuer_id -> Integer,
        certificate -> Text,
        fingerprint -> Text,
    }
}

diesel::table! {
    certificate_requests (csr_id) {
        csr_id -> Integer,
        csr -> Text,
        certificate_id -> Nullable<Integer>,
        user_id -> Nullable<Integer>,
        status -> Text,
    }
}

diesel::table! {
    private_keys (private_key_id) {
        private_key_id -> Integer,
        private_key -> Text,
        fingerprint -> Text,
    }
}

diesel::table! {
    certificate_authorities (certificate_authority_id) {
        certificate_authority_id -> Integer,
        crl -> Nullable<Text>,
        status -> Text,
        private_key_id -> Integer,
        certificate_id -> Nullable<Integer>,
        csr_id -> Integer,
    }
}

diesel::table! {
    encryption_keys (encryption_key_id) {
        encryption_key_id -> Integer,
        encryption_key -> Text,
    }
}

diesel::table! {
    jwt_secret (id) {
        id -> Integer,
        encrypted_secret -> Text,
    }
}

diesel::joinable!(certificate_requests -> users (user_id));
diesel::joinable!(certificate_authorities -> certificate_requests (csr_id));
diesel::joinable!(certificate_authorities -> private_keys (private_key_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    certificates,
    certificate_requests,
    private_keys,
    certificate_authorities,
    encryption_keys,
    jwt_secret,
);
